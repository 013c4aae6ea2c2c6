use serde::Deserialize;
use serde_json::{json, Value};

use super::Icon;
use crate::store::{Document, Fields, StoreError};

// ============================================================================
// Categories
// ============================================================================

/// A category exactly as stored: flat, with a parent pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    pub icon: Option<Icon>,
    /// `None` marks a root category.
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
struct StoredCategory {
    #[serde(default)]
    name: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
}

impl CategoryRecord {
    pub(crate) fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let stored: StoredCategory = doc.decode()?;
        let icon = stored.icon.as_deref().and_then(|key| {
            let icon = Icon::from_key(key);
            if icon.is_none() {
                tracing::debug!(category = %doc.id, icon = %key, "Unknown icon key, rendering without icon");
            }
            icon
        });
        Ok(Self {
            id: doc.id.clone(),
            name: stored.name,
            icon,
            parent_id: stored.parent_id,
        })
    }
}

/// A category with its derived children. Never persisted in this shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    pub id: String,
    pub name: String,
    pub icon: Option<Icon>,
    pub parent_id: Option<String>,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    pub(crate) fn from_record(record: &CategoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            icon: record.icon,
            parent_id: record.parent_id.clone(),
            children: Vec::new(),
        }
    }

    /// The stored fields of this node, without children.
    pub fn record(&self) -> CategoryRecord {
        CategoryRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            icon: self.icon,
            parent_id: self.parent_id.clone(),
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

pub(crate) fn category_fields(name: &str, icon: Option<Icon>, parent_id: Option<&str>) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_string(), json!(name));
    fields.insert("icon".to_string(), icon_value(icon));
    fields.insert("parent_id".to_string(), json!(parent_id));
    fields
}

pub(crate) fn icon_value(icon: Option<Icon>) -> Value {
    icon.map_or(Value::Null, |i| Value::String(i.key().to_string()))
}

// ============================================================================
// Courses
// ============================================================================

/// A course listing row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CourseRecord {
    #[serde(skip_deserializing)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Category the course was filed under. Not necessarily a leaf.
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub participants: Option<u64>,
    #[serde(default)]
    pub rating: Option<f64>,
    /// Unix seconds; newest-first ordering key.
    #[serde(default)]
    pub created_at: i64,
}

impl CourseRecord {
    pub(crate) fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut course: CourseRecord = doc.decode()?;
        course.id = doc.id.clone();
        Ok(course)
    }
}

/// Input for creating a course.
#[derive(Debug, Clone, Default)]
pub struct NewCourse {
    pub name: String,
    pub description: String,
    pub category_id: Option<String>,
    pub participants: Option<u64>,
    pub rating: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: &str, body: Value) -> Document {
        match body {
            Value::Object(map) => Document::new(id, map),
            _ => panic!("document body must be an object"),
        }
    }

    #[test]
    fn test_category_unknown_icon_reads_as_none() {
        let doc = document("c1", json!({"name": "Art", "icon": "rocket", "parent_id": null}));
        let record = CategoryRecord::from_document(&doc).unwrap();
        assert_eq!(record.icon, None);
        assert_eq!(record.name, "Art");
        assert_eq!(record.parent_id, None);
    }

    #[test]
    fn test_category_missing_fields_default() {
        let doc = document("c2", json!({"name": "Music", "icon": "music"}));
        let record = CategoryRecord::from_document(&doc).unwrap();
        assert_eq!(record.icon, Some(Icon::Music));
        assert_eq!(record.parent_id, None);
    }

    #[test]
    fn test_category_fields_shape() {
        let fields = category_fields("Chemistry", Some(Icon::FlaskConical), Some("p1"));
        assert_eq!(fields["name"], json!("Chemistry"));
        assert_eq!(fields["icon"], json!("flask-conical"));
        assert_eq!(fields["parent_id"], json!("p1"));

        let root = category_fields("Root", None, None);
        assert_eq!(root["icon"], Value::Null);
        assert_eq!(root["parent_id"], Value::Null);
    }

    #[test]
    fn test_course_from_document() {
        let doc = document(
            "k1",
            json!({
                "name": "Algebra",
                "description": "Linear equations",
                "category_id": "math",
                "participants": 12,
                "created_at": 1_700_000_000
            }),
        );
        let course = CourseRecord::from_document(&doc).unwrap();
        assert_eq!(course.id, "k1");
        assert_eq!(course.category_id.as_deref(), Some("math"));
        assert_eq!(course.participants, Some(12));
        assert_eq!(course.rating, None);
        assert_eq!(course.created_at, 1_700_000_000);
    }
}
