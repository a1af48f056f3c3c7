//! Value types exchanged with the object store.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque object identifier assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Repeatable UUID whose 16 bytes are the MD5 digest of `input`.
///
/// Identical inputs always map to the same identifier, which makes object ids derived
/// from content or paths stable across runs.
pub fn uuid_from_string(input: &str) -> Uuid {
    let digest = Md5::digest(input.as_bytes());
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&digest);
    Uuid::from_bytes(raw)
}

/// Identifier a store assigns to a newly registered metadata document.
///
/// Root objects (no parent) that carry `fmu.case.uuid` keep that uuid. Every other object
/// is keyed by its parent and relative path, so re-registering the same artifact path
/// under the same parent overwrites the previous object instead of duplicating it.
pub fn derive_object_id(parent_id: &ObjectId, metadata: &Value) -> ObjectId {
    if parent_id.is_empty()
        && let Some(case_uuid) = metadata.pointer("/fmu/case/uuid").and_then(Value::as_str)
    {
        return ObjectId::from(case_uuid);
    }
    let relative = metadata
        .pointer("/file/relative_path")
        .and_then(Value::as_str)
        .unwrap_or_default();
    ObjectId::from(uuid_from_string(&format!("{parent_id}{relative}")).to_string())
}

/// Typed search filter. Every `Some` field must match; `None` fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Matches `fmu.case.uuid` or the parent object recorded by the store.
    pub case_uuid: Option<String>,
    pub class: Option<String>,
    pub name: Option<String>,
    pub tagname: Option<String>,
    pub iteration: Option<String>,
    pub content: Option<String>,
    /// Skip documents that already describe an aggregation result.
    pub exclude_aggregations: bool,
}

impl SearchFilter {
    /// Filter on table objects of one case.
    pub fn case_tables(case_uuid: impl Into<String>) -> Self {
        Self {
            case_uuid: Some(case_uuid.into()),
            class: Some("table".to_string()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Empty tags are treated as "any tag".
    pub fn with_tagname(mut self, tagname: impl Into<String>) -> Self {
        let tagname = tagname.into();
        self.tagname = (!tagname.is_empty()).then_some(tagname);
        self
    }

    pub fn with_iteration(mut self, iteration: impl Into<String>) -> Self {
        self.iteration = Some(iteration.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn without_aggregations(mut self) -> Self {
        self.exclude_aggregations = true;
        self
    }

    /// Evaluate the filter against one stored metadata document.
    pub fn matches(&self, doc: &Value) -> bool {
        fn field_is(doc: &Value, pointer: &str, expected: &Option<String>) -> bool {
            match expected {
                None => true,
                Some(expected) => doc.pointer(pointer).and_then(Value::as_str) == Some(expected),
            }
        }

        if let Some(case_uuid) = &self.case_uuid {
            let by_case = doc.pointer("/fmu/case/uuid").and_then(Value::as_str);
            let by_parent = doc.pointer("/_sumo/parent_object").and_then(Value::as_str);
            if by_case != Some(case_uuid) && by_parent != Some(case_uuid) {
                return false;
            }
        }
        if self.exclude_aggregations && doc.pointer("/fmu/aggregation").is_some() {
            return false;
        }
        field_is(doc, "/class", &self.class)
            && field_is(doc, "/data/name", &self.name)
            && field_is(doc, "/data/tagname", &self.tagname)
            && field_is(doc, "/fmu/iteration/name", &self.iteration)
            && field_is(doc, "/data/content", &self.content)
    }
}

/// One page request. Results are ordered by object id; `search_after` resumes after the
/// last id of the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub filter: SearchFilter,
    pub size: usize,
    pub pit: Option<String>,
    pub search_after: Option<ObjectId>,
}

impl SearchRequest {
    pub fn new(filter: SearchFilter, size: usize) -> Self {
        Self {
            filter,
            size,
            pit: None,
            search_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: ObjectId,
    /// The stored metadata document.
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    /// Total number of matches, independent of paging.
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// Response to a metadata registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub status: u16,
    pub object_id: Option<ObjectId>,
    /// Where the blob for the registered object must be written.
    pub blob_url: Option<String>,
}

impl Registration {
    pub fn rejected(status: u16) -> Self {
        Self {
            status,
            object_id: None,
            blob_url: None,
        }
    }
}
