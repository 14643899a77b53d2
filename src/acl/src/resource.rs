//! Protected resources at four granularities
//!
//! A resource selects a whole entity type, one entity, one field across a
//! type, or one field of one entity. Identity is structural: two resources
//! are equal iff class, id and field all match.

use crate::error::{AclError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity identifier, possibly composite
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Vec<String>);

impl EntityId {
    /// Single-component identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(vec![id.into()])
    }

    /// Composite identifier (e.g. a compound primary key)
    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Identifier components in key order
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Whether this identifier has more than one component
    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }

    fn validate(&self) -> Result<()> {
        if self.0.is_empty() || self.0.iter().any(|p| p.is_empty()) {
            return Err(AclError::InvalidResource(
                "Entity id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical text form used as a storage key
    pub fn to_stored(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Parses the canonical text form
    pub fn from_stored(raw: &str) -> Result<Self> {
        let parts: Vec<String> = serde_json::from_str(raw)
            .map_err(|e| AclError::InvalidResource(format!("Malformed entity id '{}': {}", raw, e)))?;
        let id = Self(parts);
        id.validate()?;
        Ok(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::new(id.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// Resource granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// All instances of a type
    Class,
    /// One instance
    Entity,
    /// One field across all instances of a type
    ClassField,
    /// One field of one instance
    EntityField,
}

/// A protected resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Resource {
    /// Matches all instances of a type
    Class {
        /// Entity type name
        entity_class: String,
    },
    /// Matches one instance
    Entity {
        /// Entity type name
        entity_class: String,
        /// Instance identifier
        entity_id: EntityId,
    },
    /// Matches one field across all instances of a type
    ClassField {
        /// Entity type name
        entity_class: String,
        /// Field name
        field: String,
    },
    /// Matches one field of one instance
    EntityField {
        /// Entity type name
        entity_class: String,
        /// Instance identifier
        entity_id: EntityId,
        /// Field name
        field: String,
    },
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AclError::InvalidResource(format!("{} cannot be empty", what)));
    }
    Ok(())
}

impl Resource {
    /// Whole-class resource
    pub fn class(entity_class: impl Into<String>) -> Result<Self> {
        let entity_class = entity_class.into();
        require(&entity_class, "Entity class")?;
        Ok(Self::Class { entity_class })
    }

    /// Single-entity resource
    pub fn entity(entity_class: impl Into<String>, entity_id: impl Into<EntityId>) -> Result<Self> {
        let entity_class = entity_class.into();
        let entity_id = entity_id.into();
        require(&entity_class, "Entity class")?;
        entity_id.validate()?;
        Ok(Self::Entity {
            entity_class,
            entity_id,
        })
    }

    /// Field across all instances of a class
    pub fn class_field(entity_class: impl Into<String>, field: impl Into<String>) -> Result<Self> {
        let entity_class = entity_class.into();
        let field = field.into();
        require(&entity_class, "Entity class")?;
        require(&field, "Field")?;
        Ok(Self::ClassField {
            entity_class,
            field,
        })
    }

    /// Field of a single entity
    pub fn entity_field(
        entity_class: impl Into<String>,
        entity_id: impl Into<EntityId>,
        field: impl Into<String>,
    ) -> Result<Self> {
        let entity_class = entity_class.into();
        let entity_id = entity_id.into();
        let field = field.into();
        require(&entity_class, "Entity class")?;
        entity_id.validate()?;
        require(&field, "Field")?;
        Ok(Self::EntityField {
            entity_class,
            entity_id,
            field,
        })
    }

    /// Rebuilds a resource from its discriminating columns.
    ///
    /// Absent id and field select the class form; the presence of each
    /// component selects the variant.
    pub fn from_parts(
        entity_class: impl Into<String>,
        entity_id: Option<EntityId>,
        field: Option<String>,
    ) -> Result<Self> {
        match (entity_id, field) {
            (None, None) => Self::class(entity_class),
            (Some(id), None) => Self::entity(entity_class, id),
            (None, Some(field)) => Self::class_field(entity_class, field),
            (Some(id), Some(field)) => Self::entity_field(entity_class, id, field),
        }
    }

    /// Entity type name
    pub fn entity_class(&self) -> &str {
        match self {
            Self::Class { entity_class }
            | Self::Entity { entity_class, .. }
            | Self::ClassField { entity_class, .. }
            | Self::EntityField { entity_class, .. } => entity_class,
        }
    }

    /// Instance identifier, if instance-scoped
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Self::Entity { entity_id, .. } | Self::EntityField { entity_id, .. } => Some(entity_id),
            Self::Class { .. } | Self::ClassField { .. } => None,
        }
    }

    /// Field name, if field-scoped
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ClassField { field, .. } | Self::EntityField { field, .. } => Some(field),
            Self::Class { .. } | Self::Entity { .. } => None,
        }
    }

    /// Granularity of this resource
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Class { .. } => ResourceKind::Class,
            Self::Entity { .. } => ResourceKind::Entity,
            Self::ClassField { .. } => ResourceKind::ClassField,
            Self::EntityField { .. } => ResourceKind::EntityField,
        }
    }

    /// Class or class-field scope, i.e. a resource that cascades
    pub fn is_broad(&self) -> bool {
        matches!(self, Self::Class { .. } | Self::ClassField { .. })
    }

    /// Exact structural match used by lookups
    pub fn matches(&self, other: &Resource) -> bool {
        self == other
    }

    /// True if this resource's scope includes `other` for cascading.
    ///
    /// A class generalizes its entities, a class field generalizes the
    /// same field on each entity, and every resource generalizes itself.
    /// Field and non-field scopes never generalize each other.
    pub fn generalizes(&self, other: &Resource) -> bool {
        if self == other {
            return true;
        }

        match (self, other) {
            (Self::Class { entity_class: a }, Self::Entity { entity_class: b, .. }) => a == b,
            (
                Self::ClassField {
                    entity_class: a,
                    field: fa,
                },
                Self::EntityField {
                    entity_class: b,
                    field: fb,
                    ..
                },
            ) => a == b && fa == fb,
            _ => false,
        }
    }

    /// True if deleting this resource removes `other` with it.
    ///
    /// Containment follows the columns: a class contains everything of its
    /// type, an entity contains its fields, a class field contains the
    /// same field on every entity.
    pub fn contains(&self, other: &Resource) -> bool {
        if self.entity_class() != other.entity_class() {
            return false;
        }
        if let Some(id) = self.entity_id() {
            if other.entity_id() != Some(id) {
                return false;
            }
        }
        if let Some(field) = self.field() {
            if other.field() != Some(field) {
                return false;
            }
        }
        true
    }

    /// Concrete counterpart of a broad resource for one instance
    pub fn instance(&self, entity_id: &EntityId) -> Option<Resource> {
        match self {
            Self::Class { entity_class } => Some(Self::Entity {
                entity_class: entity_class.clone(),
                entity_id: entity_id.clone(),
            }),
            Self::ClassField {
                entity_class,
                field,
            } => Some(Self::EntityField {
                entity_class: entity_class.clone(),
                entity_id: entity_id.clone(),
                field: field.clone(),
            }),
            Self::Entity { .. } | Self::EntityField { .. } => None,
        }
    }

    /// Scopes consulted by access checks, most specific first.
    ///
    /// `EntityField -> ClassField -> Entity -> Class`, keeping only the
    /// scopes at or above this resource.
    pub fn lookup_chain(&self) -> Vec<Resource> {
        let class = Self::Class {
            entity_class: self.entity_class().to_string(),
        };

        match self {
            Self::Class { .. } => vec![class],
            Self::Entity { .. } => vec![self.clone(), class],
            Self::ClassField { .. } => vec![self.clone(), class],
            Self::EntityField {
                entity_class,
                entity_id,
                field,
            } => vec![
                self.clone(),
                Self::ClassField {
                    entity_class: entity_class.clone(),
                    field: field.clone(),
                },
                Self::Entity {
                    entity_class: entity_class.clone(),
                    entity_id: entity_id.clone(),
                },
                class,
            ],
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class { entity_class } => write!(f, "{}", entity_class),
            Self::Entity {
                entity_class,
                entity_id,
            } => write!(f, "{}#{}", entity_class, entity_id),
            Self::ClassField {
                entity_class,
                field,
            } => write!(f, "{}.{}", entity_class, field),
            Self::EntityField {
                entity_class,
                entity_id,
                field,
            } => write!(f, "{}#{}.{}", entity_class, entity_id, field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(id: &str) -> Resource {
        Resource::entity("Article", id).unwrap()
    }

    #[test]
    fn test_constructors_validate_components() {
        assert!(Resource::class("").is_err());
        assert!(Resource::entity("Article", "").is_err());
        assert!(Resource::class_field("Article", "").is_err());
        assert!(Resource::entity_field("Article", EntityId::composite(Vec::<String>::new()), "title").is_err());
        assert!(Resource::entity_field("Article", "42", "title").is_ok());
    }

    #[test]
    fn test_from_parts_selects_variant() {
        let r = Resource::from_parts("Article", None, None).unwrap();
        assert_eq!(r.kind(), ResourceKind::Class);

        let r = Resource::from_parts("Article", Some("42".into()), None).unwrap();
        assert_eq!(r.kind(), ResourceKind::Entity);

        let r = Resource::from_parts("Article", None, Some("title".to_string())).unwrap();
        assert_eq!(r.kind(), ResourceKind::ClassField);

        let r = Resource::from_parts("Article", Some("42".into()), Some("title".to_string())).unwrap();
        assert_eq!(r.kind(), ResourceKind::EntityField);
    }

    #[test]
    fn test_structural_identity() {
        assert!(article("42").matches(&article("42")));
        assert!(!article("42").matches(&article("43")));
        assert!(!article("42").matches(&Resource::entity("Comment", "42").unwrap()));
    }

    #[test]
    fn test_generalizes() {
        let class = Resource::class("Article").unwrap();
        let title = Resource::class_field("Article", "title").unwrap();
        let a42_title = Resource::entity_field("Article", "42", "title").unwrap();

        assert!(class.generalizes(&article("42")));
        assert!(class.generalizes(&class));
        assert!(!class.generalizes(&Resource::entity("Comment", "1").unwrap()));
        assert!(title.generalizes(&a42_title));
        assert!(!title.generalizes(&Resource::entity_field("Article", "42", "body").unwrap()));

        // Field and non-field scopes never mix
        assert!(!class.generalizes(&a42_title));
        assert!(!class.generalizes(&title));
        assert!(!article("42").generalizes(&a42_title));
    }

    #[test]
    fn test_contains_for_deletion() {
        let a42_title = Resource::entity_field("Article", "42", "title").unwrap();

        assert!(article("42").contains(&a42_title));
        assert!(!article("43").contains(&a42_title));
        assert!(Resource::class("Article").unwrap().contains(&a42_title));
        assert!(Resource::class_field("Article", "title").unwrap().contains(&a42_title));
        assert!(!a42_title.contains(&article("42")));
    }

    #[test]
    fn test_lookup_chain_order() {
        let chain = Resource::entity_field("Article", "42", "title").unwrap().lookup_chain();
        let kinds: Vec<_> = chain.iter().map(Resource::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::EntityField,
                ResourceKind::ClassField,
                ResourceKind::Entity,
                ResourceKind::Class
            ]
        );

        assert_eq!(article("42").lookup_chain().len(), 2);
        assert_eq!(Resource::class("Article").unwrap().lookup_chain().len(), 1);
    }

    #[test]
    fn test_instance() {
        let class = Resource::class("Article").unwrap();
        let id = EntityId::new("99");

        assert_eq!(class.instance(&id), Some(article("99")));
        assert!(class.generalizes(&article("99")));
        assert_eq!(article("99").instance(&id), None);
    }

    #[test]
    fn test_composite_ids() {
        let id = EntityId::composite(["tenant-1", "42"]);
        assert!(id.is_composite());
        assert_eq!(id.to_string(), "tenant-1,42");
        assert_eq!(EntityId::from_stored(&id.to_stored()).unwrap(), id);
        assert!(EntityId::from_stored("not json").is_err());

        let r = Resource::entity("Article", id).unwrap();
        assert_eq!(r.to_string(), "Article#tenant-1,42");
    }
}
