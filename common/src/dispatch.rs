use serde::Serialize;

use crate::{
    registry::FieldRegistry,
    types::{
        DeviceIdentity, DeviceInfoPayload, ErrorEnvelope, FieldError, FieldInfo, FieldOutcome,
        OkEnvelope, StateUpdatePayload, StateUpdateRequest,
    },
    FIRMWARE_VERSION,
};

pub const ROUTE_INDEX: &str = "/";
pub const ROUTE_INFO: &str = "/info";
pub const ROUTE_STATE: &str = "/state";

const DEFAULT_ERROR_CODE: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Other,
}

impl Method {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            _ => Self::Other,
        }
    }

    /// Only `POST` may change field state.
    pub fn is_write(self) -> bool {
        self == Self::Post
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method,
            path: path.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status_code: u16,
    pub body: String,
}

impl Reply {
    pub fn json<T: Serialize>(status_code: u16, payload: &T) -> Self {
        match serde_json::to_string(payload) {
            Ok(body) => Self { status_code, body },
            Err(err) => Self::error(&format!("Failed to encode response: {err}"), 500),
        }
    }

    /// `{status:"error", error_message}` with the given status code.
    pub fn error(message: &str, status_code: u16) -> Self {
        let body = serde_json::to_string(&ErrorEnvelope::new(message)).unwrap_or_else(|_| {
            r#"{"status":"error","error_message":"Internal error"}"#.to_string()
        });
        Self { status_code, body }
    }

    pub fn internal_error(message: &str) -> Self {
        Self::error(message, DEFAULT_ERROR_CODE)
    }
}

/// Top-level refusal of a request before any field is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub status_code: u16,
    pub message: &'static str,
}

impl Rejection {
    pub const METHOD_NOT_ALLOWED: Self = Self {
        status_code: 400,
        message: "Only POST requests allowed",
    };
    pub const INVALID_BODY: Self = Self {
        status_code: 400,
        message: "Invalid request body",
    };
    pub const NOT_FOUND: Self = Self {
        status_code: 404,
        message: "Not found",
    };
    pub const BODY_TOO_LARGE: Self = Self {
        status_code: 413,
        message: "Request body too large",
    };

    pub fn into_reply(self) -> Reply {
        Reply::error(self.message, self.status_code)
    }
}

/// Validates a declared request body length against `max`. A missing length
/// means an empty body.
pub fn checked_body_len(declared: Option<u64>, max: usize) -> Result<usize, Rejection> {
    let len = usize::try_from(declared.unwrap_or(0)).map_err(|_| Rejection::BODY_TOO_LARGE)?;
    if len > max {
        return Err(Rejection::BODY_TOO_LARGE);
    }
    Ok(len)
}

type Hook = Box<dyn FnMut() + Send>;

/// Optional notifications around every accepted state update. Registering a
/// hook replaces the previous one; there is no chaining.
#[derive(Default)]
pub struct Hooks {
    pre: Option<Hook>,
    post: Option<Hook>,
}

impl Hooks {
    pub fn set_pre(&mut self, hook: impl FnMut() + Send + 'static) {
        self.pre = Some(Box::new(hook));
    }

    pub fn set_post(&mut self, hook: impl FnMut() + Send + 'static) {
        self.post = Some(Box::new(hook));
    }

    fn run_pre(&mut self) {
        if let Some(hook) = self.pre.as_mut() {
            hook();
        }
    }

    fn run_post(&mut self) {
        if let Some(hook) = self.post.as_mut() {
            hook();
        }
    }
}

/// Borrowed view of the device used to answer one request.
pub struct Dispatcher<'a> {
    identity: &'a DeviceIdentity,
    registry: &'a mut FieldRegistry,
    hooks: &'a mut Hooks,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        identity: &'a DeviceIdentity,
        registry: &'a mut FieldRegistry,
        hooks: &'a mut Hooks,
    ) -> Self {
        Self {
            identity,
            registry,
            hooks,
        }
    }

    pub fn describe_device(&mut self) -> OkEnvelope<DeviceInfoPayload> {
        let fields = self
            .registry
            .iter_mut()
            .map(|field| FieldInfo {
                id: field.id().to_string(),
                kind: field.kind().to_string(),
                state: field.describe(),
            })
            .collect();

        OkEnvelope::with_payload(DeviceInfoPayload {
            name: self.identity.name.clone(),
            uid: self.identity.uid.clone(),
            firmware: FIRMWARE_VERSION,
            fields,
        })
    }

    pub fn apply_state(
        &mut self,
        method: Method,
        request: &StateUpdateRequest,
    ) -> Result<OkEnvelope<StateUpdatePayload>, Rejection> {
        if !method.is_write() {
            return Err(Rejection::METHOD_NOT_ALLOWED);
        }

        self.hooks.run_pre();

        let fields = request
            .fields
            .iter()
            .map(|update| {
                let applied = self
                    .registry
                    .lookup_mut(&update.id)
                    .map(|field| field.apply(&update.state));
                match applied {
                    Some(true) => FieldOutcome::ok(&update.id),
                    Some(false) => FieldOutcome::failed(&update.id, FieldError::HandlerInternalError),
                    None => FieldOutcome::failed(&update.id, FieldError::FieldNotFound),
                }
            })
            .collect();

        self.hooks.run_post();

        Ok(OkEnvelope::with_payload(StateUpdatePayload { fields }))
    }

    /// Transport-independent entry point: maps a raw request onto the three
    /// endpoints and encodes the reply.
    pub fn route(&mut self, request: &Request) -> Reply {
        match request.path.as_str() {
            ROUTE_INDEX => Reply::json(200, &OkEnvelope::bare()),
            ROUTE_INFO => Reply::json(200, &self.describe_device()),
            ROUTE_STATE => self.route_state(request),
            _ => Rejection::NOT_FOUND.into_reply(),
        }
    }

    fn route_state(&mut self, request: &Request) -> Reply {
        if !request.method.is_write() {
            return Rejection::METHOD_NOT_ALLOWED.into_reply();
        }

        let Ok(update) = serde_json::from_slice::<StateUpdateRequest>(&request.body) else {
            return Rejection::INVALID_BODY.into_reply();
        };

        match self.apply_state(request.method, &update) {
            Ok(envelope) => Reply::json(200, &envelope),
            Err(rejection) => rejection.into_reply(),
        }
    }
}
