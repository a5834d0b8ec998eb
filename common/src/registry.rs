use serde_json::{Map, Value};

/// Device-side behavior behind one addressable field.
pub trait FieldHandler: Send {
    /// Write the field's current state into `state`.
    fn describe(&mut self, state: &mut Map<String, Value>);

    /// Try to apply a requested state. `false` reports a handler failure.
    fn apply(&mut self, state: &Value) -> bool;
}

/// Adapter that builds a [`FieldHandler`] out of two closures.
pub struct FnHandler<D, A> {
    describe: D,
    apply: A,
}

impl<D, A> FnHandler<D, A>
where
    D: FnMut(&mut Map<String, Value>) + Send,
    A: FnMut(&Value) -> bool + Send,
{
    pub fn new(describe: D, apply: A) -> Self {
        Self { describe, apply }
    }
}

impl<D, A> FieldHandler for FnHandler<D, A>
where
    D: FnMut(&mut Map<String, Value>) + Send,
    A: FnMut(&Value) -> bool + Send,
{
    fn describe(&mut self, state: &mut Map<String, Value>) {
        (self.describe)(state)
    }

    fn apply(&mut self, state: &Value) -> bool {
        (self.apply)(state)
    }
}

pub struct Field {
    id: String,
    kind: String,
    handler: Box<dyn FieldHandler>,
}

impl Field {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        handler: impl FieldHandler + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            handler: Box::new(handler),
        }
    }

    pub fn from_fns<D, A>(id: impl Into<String>, kind: impl Into<String>, describe: D, apply: A) -> Self
    where
        D: FnMut(&mut Map<String, Value>) + Send + 'static,
        A: FnMut(&Value) -> bool + Send + 'static,
    {
        Self::new(id, kind, FnHandler::new(describe, apply))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Opaque type tag reported to clients.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn describe(&mut self) -> Map<String, Value> {
        let mut state = Map::new();
        self.handler.describe(&mut state);
        state
    }

    pub fn apply(&mut self, state: &Value) -> bool {
        self.handler.apply(state)
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Fixed, ordered set of fields. The sequence is frozen at construction: no
/// API adds, removes or reorders entries afterward.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: Vec<Field>,
}

impl FieldRegistry {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.fields.iter_mut()
    }

    /// First field whose id matches exactly (case-sensitive).
    pub fn lookup(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub(crate) fn lookup_mut(&mut self, id: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|field| field.id == id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn inert(id: &str, kind: &str) -> Field {
        Field::from_fns(id, kind, |_| {}, |_| true)
    }

    #[test]
    fn lookup_finds_registered_field() {
        let registry = FieldRegistry::new(vec![inert("led1", "switch"), inert("temp1", "sensor")]);

        let field = registry.lookup("temp1").unwrap();
        assert_eq!(field.id(), "temp1");
        assert_eq!(field.kind(), "sensor");
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let registry = FieldRegistry::new(vec![inert("led1", "switch")]);

        assert!(registry.lookup("LED1").is_none());
        assert!(registry.lookup("led").is_none());
    }

    #[test]
    fn lookup_on_empty_registry_fails() {
        let registry = FieldRegistry::default();

        assert!(registry.is_empty());
        assert!(registry.lookup("led1").is_none());
    }

    #[test]
    fn lookup_is_stable_across_calls() {
        let registry = FieldRegistry::new(vec![inert("a", "x"), inert("b", "y")]);

        for _ in 0..3 {
            assert_eq!(registry.lookup("b").map(Field::kind), Some("y"));
        }
        let order: Vec<_> = registry.iter().map(Field::id).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn closure_handlers_drive_describe_and_apply() {
        let mut field = Field::from_fns(
            "dimmer",
            "level",
            |state| {
                state.insert("level".into(), json!(40));
            },
            |value| value.as_u64().is_some_and(|level| level <= 100),
        );

        assert_eq!(Value::Object(field.describe()), json!({ "level": 40 }));
        assert!(field.apply(&json!(80)));
        assert!(!field.apply(&json!(180)));
        assert!(!field.apply(&json!("high")));
    }
}
