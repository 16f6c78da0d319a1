//! `OpenAPI` schema -> tool schema translation.
//!
//! [`SchemaTranslator`] walks an `openapiv3` schema (inline or `$ref`) and produces a
//! [`SchemaNode`]: a tagged tree that renders to the JSON Schema fragment advertised in a
//! tool's input schema.
//!
//! Reference cycles are cut with a path-scoped [`VisitedRefs`] chain. The chain lives on
//! the stack of the recursion itself, so a model entered on one branch is still
//! resolvable on a sibling branch, and the translator holds no mutable state.

use openapiv3::{
    AnySchema, Components, ReferenceOr, Schema, SchemaKind as OasKind, Type,
    VariantOrUnknownOrEmpty,
};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value, json};
use std::collections::BTreeMap;

/// A translated schema: kind-specific structure plus the shared attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub attrs: SchemaAttributes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Primitive,
    /// Declared properties, plus any combinators written alongside them.
    Object {
        properties: BTreeMap<String, SchemaNode>,
        required: Vec<String>,
        compositions: Vec<Composition>,
    },
    Array {
        items: Option<Box<SchemaNode>>,
    },
    /// One or more combinators with no object base. Never empty.
    Composite { compositions: Vec<Composition> },
}

/// A combinator keyword and its translated branches, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub combinator: Combinator,
    pub branches: Vec<SchemaNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    AllOf,
    OneOf,
    AnyOf,
}

impl Combinator {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Combinator::AllOf => "allOf",
            Combinator::OneOf => "oneOf",
            Combinator::AnyOf => "anyOf",
        }
    }
}

/// Attributes copied verbatim from the source schema. Nothing here is validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaAttributes {
    /// `None` only for composite nodes that declare no type of their own.
    pub type_name: Option<String>,
    pub format: Option<String>,
    pub description: Option<String>,
    pub enum_values: Vec<Value>,
    pub default: Option<Value>,
    pub example: Option<Value>,
    pub minimum: Option<Number>,
    pub maximum: Option<Number>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub min_properties: Option<usize>,
    pub max_properties: Option<usize>,
}

const CIRCULAR_MARKER: &str = "(circular reference detected)";

impl SchemaNode {
    /// A plain `{"type": "string"}` node; the degraded form of anything unresolvable.
    #[must_use]
    pub fn string() -> Self {
        Self::primitive("string")
    }

    #[must_use]
    pub fn primitive(type_name: &str) -> Self {
        Self {
            kind: SchemaKind::Primitive,
            attrs: SchemaAttributes {
                type_name: Some(type_name.to_string()),
                ..SchemaAttributes::default()
            },
        }
    }

    /// Terminal stand-in for a model that is already being expanded on the current path.
    #[must_use]
    pub fn circular_placeholder(model: &str) -> Self {
        Self {
            kind: SchemaKind::Object {
                properties: BTreeMap::new(),
                required: Vec::new(),
                compositions: Vec::new(),
            },
            attrs: SchemaAttributes {
                type_name: Some("object".to_string()),
                description: Some(format!("Reference to {model} {CIRCULAR_MARKER}")),
                ..SchemaAttributes::default()
            },
        }
    }

    #[must_use]
    pub fn is_circular_placeholder(&self) -> bool {
        matches!(&self.kind, SchemaKind::Object { properties, .. } if properties.is_empty())
            && self
                .attrs
                .description
                .as_deref()
                .is_some_and(|d| d.ends_with(CIRCULAR_MARKER))
    }

    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.attrs.type_name.as_deref()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.attrs.description.as_deref()
    }

    /// Property mapping for object nodes.
    #[must_use]
    pub fn properties(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match &self.kind {
            SchemaKind::Object { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Declared required names for object nodes (empty otherwise).
    #[must_use]
    pub fn required(&self) -> &[String] {
        match &self.kind {
            SchemaKind::Object { required, .. } => required,
            _ => &[],
        }
    }

    #[must_use]
    pub fn items(&self) -> Option<&SchemaNode> {
        match &self.kind {
            SchemaKind::Array { items } => items.as_deref(),
            _ => None,
        }
    }

    /// Combinators on this node, whether or not it also declares properties.
    #[must_use]
    pub fn compositions(&self) -> &[Composition] {
        match &self.kind {
            SchemaKind::Object { compositions, .. } | SchemaKind::Composite { compositions } => {
                compositions
            }
            _ => &[],
        }
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self.kind, SchemaKind::Object { .. })
    }

    fn annotate_model(&mut self, model: &str) {
        let description = match self.attrs.description.take().filter(|d| !d.is_empty()) {
            Some(d) => format!("{d} (Model: {model})"),
            None => format!("Model: {model}"),
        };
        self.attrs.description = Some(description);
    }

    /// Render as a JSON Schema fragment.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let a = &self.attrs;
        let mut out = Map::new();

        if let Some(t) = &a.type_name {
            out.insert("type".to_string(), json!(t));
        }
        if let Some(f) = &a.format {
            out.insert("format".to_string(), json!(f));
        }
        if let Some(d) = &a.description {
            out.insert("description".to_string(), json!(d));
        }
        if !a.enum_values.is_empty() {
            out.insert("enum".to_string(), Value::Array(a.enum_values.clone()));
        }

        match &self.kind {
            SchemaKind::Primitive => {}
            SchemaKind::Object {
                properties,
                required,
                ..
            } => {
                if !properties.is_empty() {
                    let props: Map<String, Value> = properties
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect();
                    out.insert("properties".to_string(), Value::Object(props));
                }
                if !required.is_empty() {
                    out.insert("required".to_string(), json!(required));
                }
            }
            SchemaKind::Array { items } => {
                if let Some(items) = items {
                    out.insert("items".to_string(), items.to_json());
                }
            }
            SchemaKind::Composite { .. } => {}
        }
        for c in self.compositions() {
            let branches: Vec<Value> = c.branches.iter().map(SchemaNode::to_json).collect();
            out.insert(c.combinator.keyword().to_string(), Value::Array(branches));
        }

        let numbers = [("minimum", &a.minimum), ("maximum", &a.maximum)];
        for (key, value) in numbers {
            if let Some(n) = value {
                out.insert(key.to_string(), Value::Number(n.clone()));
            }
        }
        let counts = [
            ("minLength", a.min_length),
            ("maxLength", a.max_length),
            ("minItems", a.min_items),
            ("maxItems", a.max_items),
            ("minProperties", a.min_properties),
            ("maxProperties", a.max_properties),
        ];
        for (key, value) in counts {
            if let Some(n) = value {
                out.insert(key.to_string(), json!(n));
            }
        }
        if let Some(p) = &a.pattern {
            out.insert("pattern".to_string(), json!(p));
        }
        if let Some(d) = &a.default {
            out.insert("default".to_string(), d.clone());
        }
        if let Some(e) = &a.example {
            out.insert("example".to_string(), e.clone());
        }

        Value::Object(out)
    }
}

impl Serialize for SchemaNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Source of referenced schemas.
pub trait SchemaLookup: Sync {
    /// Resolve a `$ref` string. `None` means unresolved; the translator degrades.
    fn lookup_schema(&self, reference: &str) -> Option<ReferenceOr<Schema>>;
}

/// No reference can be resolved.
impl SchemaLookup for () {
    fn lookup_schema(&self, _reference: &str) -> Option<ReferenceOr<Schema>> {
        None
    }
}

/// Resolves `#/components/schemas/<Name>` only.
impl SchemaLookup for Components {
    fn lookup_schema(&self, reference: &str) -> Option<ReferenceOr<Schema>> {
        let name = reference.strip_prefix("#/components/schemas/")?;
        self.schemas.get(name).cloned()
    }
}

/// A borrowed schema position: either a `$ref` string or an inline schema.
#[derive(Debug, Clone, Copy)]
pub enum SchemaRef<'s> {
    Reference(&'s str),
    Inline(&'s Schema),
}

impl<'s> From<&'s ReferenceOr<Schema>> for SchemaRef<'s> {
    fn from(r: &'s ReferenceOr<Schema>) -> Self {
        match r {
            ReferenceOr::Reference { reference } => SchemaRef::Reference(reference),
            ReferenceOr::Item(schema) => SchemaRef::Inline(schema),
        }
    }
}

impl<'s> From<&'s ReferenceOr<Box<Schema>>> for SchemaRef<'s> {
    fn from(r: &'s ReferenceOr<Box<Schema>>) -> Self {
        match r {
            ReferenceOr::Reference { reference } => SchemaRef::Reference(reference),
            ReferenceOr::Item(schema) => SchemaRef::Inline(schema),
        }
    }
}

/// References entered on the current recursion path, innermost first.
///
/// Each recursive call extends the chain with a new stack frame; returning drops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisitedRefs<'p> {
    head: Option<(&'p str, &'p VisitedRefs<'p>)>,
}

impl<'p> VisitedRefs<'p> {
    #[must_use]
    pub const fn empty() -> Self {
        Self { head: None }
    }

    #[must_use]
    pub fn contains(&self, reference: &str) -> bool {
        let mut cur = self;
        while let Some((r, parent)) = cur.head {
            if r == reference {
                return true;
            }
            cur = parent;
        }
        false
    }

    #[must_use]
    pub fn with<'c>(&'c self, reference: &'c str) -> VisitedRefs<'c> {
        VisitedRefs {
            head: Some((reference, self)),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut cur = self;
        while let Some((_, parent)) = cur.head {
            n += 1;
            cur = parent;
        }
        n
    }
}

/// Recursive `OpenAPI` schema translator.
#[derive(Clone, Copy)]
pub struct SchemaTranslator<'a> {
    lookup: &'a dyn SchemaLookup,
}

impl<'a> SchemaTranslator<'a> {
    #[must_use]
    pub fn new(lookup: &'a dyn SchemaLookup) -> Self {
        Self { lookup }
    }

    /// Translate a top-level schema position with an empty visited path.
    #[must_use]
    pub fn translate(&self, schema: Option<&ReferenceOr<Schema>>) -> SchemaNode {
        self.translate_with(schema.map(SchemaRef::from), &VisitedRefs::empty())
    }

    /// Translate with an explicit path-scoped visited set.
    #[must_use]
    pub fn translate_with(
        &self,
        schema: Option<SchemaRef<'_>>,
        visited: &VisitedRefs<'_>,
    ) -> SchemaNode {
        match schema {
            None => SchemaNode::string(),
            Some(SchemaRef::Inline(schema)) => self.translate_schema(schema, visited),
            Some(SchemaRef::Reference(reference)) => self.translate_reference(reference, visited),
        }
    }

    fn translate_reference(&self, reference: &str, visited: &VisitedRefs<'_>) -> SchemaNode {
        let model = model_name(reference);

        if visited.contains(reference) {
            tracing::debug!(reference, depth = visited.depth(), "circular schema reference");
            return SchemaNode::circular_placeholder(model);
        }

        let Some(target) = self.lookup.lookup_schema(reference) else {
            tracing::debug!(reference, "unresolved schema reference, degrading to string");
            let mut node = SchemaNode::string();
            node.attrs.description = Some(format!("Reference to model: {model}"));
            return node;
        };

        let inner = visited.with(reference);
        let mut node = self.translate_with(Some(SchemaRef::from(&target)), &inner);
        node.annotate_model(model);
        node
    }

    fn translate_schema(&self, schema: &Schema, visited: &VisitedRefs<'_>) -> SchemaNode {
        let data = &schema.schema_data;
        let mut attrs = SchemaAttributes {
            description: data.description.clone(),
            default: data.default.clone(),
            example: data.example.clone(),
            ..SchemaAttributes::default()
        };

        let kind = match &schema.schema_kind {
            OasKind::Type(t) => self.translate_type(t, &mut attrs, visited),
            OasKind::AllOf { all_of } => SchemaKind::Composite {
                compositions: vec![self.composition(Combinator::AllOf, all_of, visited)],
            },
            OasKind::OneOf { one_of } => SchemaKind::Composite {
                compositions: vec![self.composition(Combinator::OneOf, one_of, visited)],
            },
            OasKind::AnyOf { any_of } => SchemaKind::Composite {
                compositions: vec![self.composition(Combinator::AnyOf, any_of, visited)],
            },
            OasKind::Not { .. } => {
                tracing::debug!("'not' schemas are not representable, degrading to string");
                attrs.type_name = Some("string".to_string());
                SchemaKind::Primitive
            }
            OasKind::Any(any) => self.translate_any(any, &mut attrs, visited),
        };

        SchemaNode { kind, attrs }
    }

    fn translate_type(
        &self,
        t: &Type,
        attrs: &mut SchemaAttributes,
        visited: &VisitedRefs<'_>,
    ) -> SchemaKind {
        match t {
            Type::String(s) => {
                attrs.type_name = Some("string".to_string());
                attrs.format = format_name(&s.format);
                attrs.pattern.clone_from(&s.pattern);
                attrs.min_length = s.min_length;
                attrs.max_length = s.max_length;
                attrs.enum_values = s
                    .enumeration
                    .iter()
                    .map(|v| v.as_ref().map_or(Value::Null, |s| json!(s)))
                    .collect();
                SchemaKind::Primitive
            }
            Type::Number(n) => {
                attrs.type_name = Some("number".to_string());
                attrs.format = format_name(&n.format);
                attrs.minimum = n.minimum.and_then(Number::from_f64);
                attrs.maximum = n.maximum.and_then(Number::from_f64);
                attrs.enum_values = n
                    .enumeration
                    .iter()
                    .map(|v| v.and_then(Number::from_f64).map_or(Value::Null, Value::Number))
                    .collect();
                SchemaKind::Primitive
            }
            Type::Integer(i) => {
                attrs.type_name = Some("integer".to_string());
                attrs.format = format_name(&i.format);
                attrs.minimum = i.minimum.map(Number::from);
                attrs.maximum = i.maximum.map(Number::from);
                attrs.enum_values = i
                    .enumeration
                    .iter()
                    .map(|v| v.map_or(Value::Null, |n| json!(n)))
                    .collect();
                SchemaKind::Primitive
            }
            Type::Boolean(b) => {
                attrs.type_name = Some("boolean".to_string());
                attrs.enum_values = b
                    .enumeration
                    .iter()
                    .map(|v| v.map_or(Value::Null, Value::Bool))
                    .collect();
                SchemaKind::Primitive
            }
            Type::Object(o) => {
                attrs.type_name = Some("object".to_string());
                attrs.min_properties = o.min_properties;
                attrs.max_properties = o.max_properties;
                let properties = o
                    .properties
                    .iter()
                    .map(|(name, prop)| {
                        (
                            name.clone(),
                            self.translate_with(Some(SchemaRef::from(prop)), visited),
                        )
                    })
                    .collect();
                SchemaKind::Object {
                    properties,
                    required: o.required.clone(),
                    compositions: Vec::new(),
                }
            }
            Type::Array(a) => {
                attrs.type_name = Some("array".to_string());
                attrs.min_items = a.min_items;
                attrs.max_items = a.max_items;
                let items = a
                    .items
                    .as_ref()
                    .map(|i| Box::new(self.translate_with(Some(SchemaRef::from(i)), visited)));
                SchemaKind::Array { items }
            }
        }
    }

    /// Schemas `openapiv3` could not classify (no `type`, mixed keywords).
    fn translate_any(
        &self,
        any: &AnySchema,
        attrs: &mut SchemaAttributes,
        visited: &VisitedRefs<'_>,
    ) -> SchemaKind {
        attrs.format.clone_from(&any.format);
        attrs.pattern.clone_from(&any.pattern);
        attrs.enum_values.clone_from(&any.enumeration);
        attrs.minimum = any.minimum.and_then(Number::from_f64);
        attrs.maximum = any.maximum.and_then(Number::from_f64);
        attrs.min_length = any.min_length;
        attrs.max_length = any.max_length;
        attrs.min_items = any.min_items;
        attrs.max_items = any.max_items;
        attrs.min_properties = any.min_properties;
        attrs.max_properties = any.max_properties;

        let compositions: Vec<Composition> = [
            (Combinator::AllOf, &any.all_of),
            (Combinator::OneOf, &any.one_of),
            (Combinator::AnyOf, &any.any_of),
        ]
        .into_iter()
        .filter(|(_, branches)| !branches.is_empty())
        .map(|(combinator, branches)| self.composition(combinator, branches, visited))
        .collect();

        let has_object_base = any.typ.as_deref() == Some("object") || !any.properties.is_empty();
        if !compositions.is_empty() && !has_object_base {
            attrs.type_name.clone_from(&any.typ);
            return SchemaKind::Composite { compositions };
        }

        let type_name = match &any.typ {
            Some(t) => t.clone(),
            None if has_object_base => "object".to_string(),
            None => "string".to_string(),
        };
        let kind = match type_name.as_str() {
            "object" => SchemaKind::Object {
                properties: any
                    .properties
                    .iter()
                    .map(|(name, prop)| {
                        (
                            name.clone(),
                            self.translate_with(Some(SchemaRef::from(prop)), visited),
                        )
                    })
                    .collect(),
                required: any.required.clone(),
                compositions,
            },
            "array" => SchemaKind::Array {
                items: any
                    .items
                    .as_ref()
                    .map(|i| Box::new(self.translate_with(Some(SchemaRef::from(i)), visited))),
            },
            _ => SchemaKind::Primitive,
        };
        attrs.type_name = Some(type_name);
        kind
    }

    fn composition(
        &self,
        combinator: Combinator,
        branches: &[ReferenceOr<Schema>],
        visited: &VisitedRefs<'_>,
    ) -> Composition {
        Composition {
            combinator,
            branches: branches
                .iter()
                .map(|b| self.translate_with(Some(SchemaRef::from(b)), visited))
                .collect(),
        }
    }
}

/// `#/components/schemas/Pet` -> `Pet`.
#[must_use]
pub fn model_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

fn format_name<T: Serialize>(format: &VariantOrUnknownOrEmpty<T>) -> Option<String> {
    match format {
        VariantOrUnknownOrEmpty::Item(known) => serde_json::to_value(known)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string)),
        VariantOrUnknownOrEmpty::Unknown(s) => Some(s.clone()),
        VariantOrUnknownOrEmpty::Empty => None,
    }
}
