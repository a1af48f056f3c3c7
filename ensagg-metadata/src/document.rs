use ensagg_result::Result;
use ensagg_storage::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Typed metadata document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub data: DataBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayBlock>,
    #[serde(default)]
    pub file: FileBlock,
    #[serde(default)]
    pub fmu: FmuBlock,
    /// Bookkeeping added by the store. Never sent back on registration.
    #[serde(rename = "_sumo", default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn parent_object(&self) -> Option<ObjectId> {
        self.service
            .as_ref()
            .and_then(|s| s.parent_object.clone())
    }

    pub fn realization_id(&self) -> Option<i32> {
        self.fmu.realization.as_ref().map(|r| r.id)
    }

    pub fn iteration_name(&self) -> &str {
        self.fmu
            .iteration
            .as_ref()
            .map(|i| i.name.as_str())
            .unwrap_or_default()
    }

    pub fn tagname(&self) -> &str {
        self.data.tagname.as_deref().unwrap_or_default()
    }

    /// Column names listed in `data.spec.columns`, if any.
    pub fn columns(&self) -> &[String] {
        self.data
            .spec
            .as_ref()
            .map(|s| s.columns.as_slice())
            .unwrap_or_default()
    }

    /// Grouping columns from `data.table_index`, falling back to `data.spec.table_index`.
    pub fn table_index(&self) -> Option<&[String]> {
        self.data
            .table_index
            .as_deref()
            .or_else(|| self.data.spec.as_ref()?.table_index.as_deref())
            .filter(|index| !index.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataBlock {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_index: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<TableSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_index: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_columns: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FmuBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<CaseBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realization: Option<RealizationBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationBlock>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaseBlock {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IterationBlock {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RealizationBlock {
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregationBlock {
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub realization_ids: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Collated realization parameters, `{parameter: {realization_id: value}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_object: Option<ObjectId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn realization_doc() -> Value {
        json!({
            "class": "table",
            "masterdata": {"smda": {"field": [{"identifier": "DROGON"}]}},
            "data": {
                "name": "summary",
                "tagname": "eclipse",
                "content": "timeseries",
                "format": "arrow",
                "spec": {"columns": ["DATE", "FOPT"], "num_rows": 2},
            },
            "file": {"relative_path": "realization-3/iter-0/share/results/tables/summary.arrow"},
            "fmu": {
                "case": {"uuid": "8f3e", "name": "drogon_ahm"},
                "iteration": {"name": "iter-0", "id": 0},
                "realization": {"id": 3, "name": "realization-3", "parameters": {"MULT": 1.5}},
            },
            "_sumo": {"parent_object": "8f3e", "blob_name": "abc"},
        })
    }

    #[test]
    fn unknown_fields_survive_round_trip() {
        let doc = realization_doc();
        let meta = Metadata::from_value(doc.clone()).unwrap();
        assert_eq!(meta.to_value().unwrap(), doc);
        assert!(meta.extra.contains_key("masterdata"));
        assert_eq!(meta.data.extra.get("format"), Some(&json!("arrow")));
    }

    #[test]
    fn accessors_read_nested_blocks() {
        let meta = Metadata::from_value(realization_doc()).unwrap();
        assert_eq!(meta.parent_object(), Some(ObjectId::from("8f3e")));
        assert_eq!(meta.realization_id(), Some(3));
        assert_eq!(meta.iteration_name(), "iter-0");
        assert_eq!(meta.tagname(), "eclipse");
        assert_eq!(meta.columns().to_vec(), vec!["DATE".to_string(), "FOPT".to_string()]);
        assert_eq!(meta.table_index(), None);
    }

    #[test]
    fn table_index_falls_back_to_spec() {
        let mut meta = Metadata::from_value(realization_doc()).unwrap();
        meta.data.spec.as_mut().unwrap().table_index = Some(vec!["ZONE".into()]);
        assert_eq!(meta.table_index(), Some(&["ZONE".to_string()][..]));
        meta.data.table_index = Some(vec!["DATE".into()]);
        assert_eq!(meta.table_index(), Some(&["DATE".to_string()][..]));
    }
}
