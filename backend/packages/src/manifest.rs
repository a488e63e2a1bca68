//! Package manifest parsing.
//!
//! A manifest is a JSON, YAML or XML document:
//!
//! ```yaml
//! name: demo.pack
//! version: 3                      # or "3", or "{internal.core.version}"
//! BaseInfo:
//!   Name: Demo
//!   Author: someone
//!   Dependencies:
//!     - { name: core.lib, minVersion: 1, mustLoad: true }
//! Compatibility: { TargetVersion: 12, MinVersion: 10 }
//! EntryCode: Entry.lua
//! ContainCSharp: false
//! Type: Module
//! ```
//!
//! The XML form carries `name` and `version` as attributes of the root:
//!
//! ```xml
//! <Package name="demo.pack" version="3">
//!   <BaseInfo>
//!     <Name>Demo</Name>
//!     <Dependencies>
//!       <Dependency name="core.lib" minVersion="1" mustLoad="true"/>
//!     </Dependencies>
//!   </BaseInfo>
//!   <Compatibility><TargetVersion>12</TargetVersion><MinVersion>10</MinVersion></Compatibility>
//!   <EntryCode>Entry.lua</EntryCode>
//!   <Type>Module</Type>
//! </Package>
//! ```
//!
//! Optional values are read leniently: a malformed value falls back to its
//! default with a warning instead of failing the whole manifest.

use std::path::Path;

use packrt_core::{IncompatibleManifest, PackageError, PackageResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Placeholder that resolves to the running build version.
pub const BUILD_VERSION_PLACEHOLDER: &str = "{internal.core.version}";

/// File names probed, in order, when looking for a manifest in a directory.
pub const MANIFEST_FILE_NAMES: [&str; 4] = [
    "PackageDef.json",
    "PackageDef.yaml",
    "PackageDef.yml",
    "PackageDef.xml",
];

/// XML elements read as mappings even when empty.
const XML_MAPPING_ELEMENTS: [&str; 2] = ["BaseInfo", "Compatibility"];
/// XML elements whose children form a list.
const XML_LIST_ELEMENTS: [&str; 1] = ["Dependencies"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageKind {
    /// Resources only, no code to run.
    #[default]
    Asset,
    Module,
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asset => f.write_str("Asset"),
            Self::Module => f.write_str("Module"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    pub name: String,
    pub min_version: u32,
    /// Loading fails when a required dependency is not registered.
    pub must_load: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseInfo {
    pub name: String,
    pub author: String,
    pub introduction: String,
    pub description: String,
    pub link: String,
    pub dependencies: Vec<DependencySpec>,
}

/// Parsed manifest. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    pub name: String,
    pub version: u32,
    pub target_version: u32,
    pub min_version: u32,
    pub kind: PackageKind,
    pub entry_code: String,
    pub contains_native: bool,
    pub base_info: BaseInfo,
}

impl PackageDescriptor {
    /// Minimal module descriptor for packages built in code rather than parsed.
    pub fn module(name: impl Into<String>, version: u32, build_version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            target_version: build_version,
            min_version: build_version,
            kind: PackageKind::Module,
            entry_code: String::new(),
            contains_native: false,
            base_info: BaseInfo::default(),
        }
    }

    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.base_info.dependencies
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
    Xml,
}

impl ManifestFormat {
    /// `.json` is JSON, `.xml` is XML; anything else is treated as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            Some(ext) if ext.eq_ignore_ascii_case("xml") => Self::Xml,
            _ => Self::Yaml,
        }
    }
}

/// Parses manifest text.
pub fn parse_manifest(
    text: &str,
    format: ManifestFormat,
    build_version: u32,
) -> PackageResult<PackageDescriptor> {
    let root: Value = match format {
        ManifestFormat::Json => {
            serde_json::from_str(text).map_err(|e| PackageError::InvalidManifest(e.to_string()))?
        }
        ManifestFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| PackageError::InvalidManifest(e.to_string()))?
        }
        ManifestFormat::Xml => xml_to_value(text)?,
    };
    parse_manifest_value(&root, build_version)
}

/// Reads and parses the manifest at `path`.
pub async fn read_manifest(path: &Path, build_version: u32) -> PackageResult<PackageDescriptor> {
    let text = tokio::fs::read_to_string(path).await?;
    debug!(path = %path.display(), "read package manifest");
    parse_manifest(&text, ManifestFormat::from_path(path), build_version)
}

/// Returns the first manifest file present in `dir`.
pub fn find_manifest(dir: &Path) -> Option<std::path::PathBuf> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

pub fn parse_manifest_value(root: &Value, build_version: u32) -> PackageResult<PackageDescriptor> {
    let Value::Object(root) = root else {
        return Err(PackageError::InvalidManifest(
            "manifest root must be a mapping".into(),
        ));
    };

    let name = match root.get("name") {
        None | Some(Value::Null) => return Err(PackageError::MissingAttribute("name".into())),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(other) => {
            return Err(PackageError::InvalidManifest(format!(
                "`name` must be a non-empty string, got {other}"
            )));
        }
    };
    let version = match root.get("version") {
        None | Some(Value::Null) => return Err(PackageError::MissingAttribute("version".into())),
        Some(v) => parse_version(v, build_version),
    };
    let base_info = match root.get("BaseInfo") {
        Some(Value::Object(map)) => parse_base_info(map, &name),
        Some(Value::Null) | None => return Err(PackageError::MissingAttribute("BaseInfo".into())),
        Some(_) => {
            return Err(PackageError::InvalidManifest(
                "`BaseInfo` must be a mapping".into(),
            ));
        }
    };

    let mut target_version = build_version;
    let mut min_version = build_version;
    if let Some(Value::Object(compat)) = root.get("Compatibility") {
        if let Some(v) = compat.get("TargetVersion") {
            target_version = lenient_u32(v, build_version, "Compatibility/TargetVersion");
        }
        if let Some(v) = compat.get("MinVersion") {
            min_version = lenient_u32(v, build_version, "Compatibility/MinVersion");
        }
    }

    if min_version > build_version {
        warn!(
            package = %name,
            min_version,
            build_version,
            "package requires a newer runtime"
        );
        return Err(PackageError::PackageIncompatible(Box::new(IncompatibleManifest {
            name,
            version,
            target_version,
            min_version,
            build_version,
        })));
    }

    let entry_code = match root.get("EntryCode") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let contains_native = root
        .get("ContainCSharp")
        .map(|v| lenient_bool(v, false, "ContainCSharp"))
        .unwrap_or(false);
    let kind = root.get("Type").map(parse_kind).unwrap_or_default();

    Ok(PackageDescriptor {
        name,
        version,
        target_version,
        min_version,
        kind,
        entry_code,
        contains_native,
        base_info,
    })
}

struct XmlElement {
    name: String,
    fields: Vec<(String, Value)>,
    text: String,
}

impl XmlElement {
    fn open(start: &BytesStart<'_>) -> PackageResult<Self> {
        let mut fields = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| PackageError::InvalidManifest(e.to_string()))?;
            let value = attr.unescape_value().map_err(xml_error)?;
            fields.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                Value::String(value.into_owned()),
            ));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            fields,
            text: String::new(),
        })
    }

    fn into_value(self) -> Value {
        if XML_LIST_ELEMENTS.contains(&self.name.as_str()) {
            return Value::Array(self.fields.into_iter().map(|(_, v)| v).collect());
        }
        if self.fields.is_empty() && !XML_MAPPING_ELEMENTS.contains(&self.name.as_str()) {
            return match self.text.trim() {
                "" => Value::Null,
                text => Value::String(text.to_string()),
            };
        }

        let mut map = Map::new();
        for (key, value) in self.fields {
            match map.get_mut(&key) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(key, value);
                }
            }
        }
        Value::Object(map)
    }
}

fn xml_error(e: quick_xml::Error) -> PackageError {
    PackageError::InvalidManifest(format!("malformed XML: {e}"))
}

/// Converts an XML manifest into the same value tree the JSON and YAML
/// forms produce.
fn xml_to_value(text: &str) -> PackageResult<Value> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut open: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    loop {
        let closed = match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => {
                open.push(XmlElement::open(&start)?);
                None
            }
            Event::Empty(start) => Some(XmlElement::open(&start)?),
            Event::End(_) => open.pop(),
            Event::Text(t) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&t.unescape().map_err(xml_error)?);
                }
                None
            }
            Event::CData(data) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
                None
            }
            Event::Eof => break,
            _ => None,
        };

        if let Some(element) = closed {
            match open.last_mut() {
                Some(parent) => {
                    let name = element.name.clone();
                    parent.fields.push((name, element.into_value()));
                }
                None if root.is_none() => root = Some(element),
                None => {
                    return Err(PackageError::InvalidManifest(
                        "XML manifest has more than one root element".into(),
                    ));
                }
            }
        }
    }

    match root {
        Some(element) if element.name == "Package" => Ok(element.into_value()),
        Some(element) => Err(PackageError::InvalidManifest(format!(
            "XML manifest root must be <Package>, got <{}>",
            element.name
        ))),
        None => Err(PackageError::InvalidManifest("XML manifest is empty".into())),
    }
}

fn parse_version(v: &Value, build_version: u32) -> u32 {
    match v {
        Value::String(s) if s == BUILD_VERSION_PLACEHOLDER => build_version,
        other => lenient_u32(other, 0, "version"),
    }
}

fn parse_base_info(map: &Map<String, Value>, package: &str) -> BaseInfo {
    let text = |key: &str| match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let mut dependencies = Vec::new();
    if let Some(Value::Array(items)) = map.get("Dependencies") {
        for item in items {
            let Some(name) = item.get("name").and_then(Value::as_str) else {
                warn!(package = %package, entry = %item, "dependency without a name ignored");
                continue;
            };
            dependencies.push(DependencySpec {
                name: name.to_string(),
                min_version: item
                    .get("minVersion")
                    .map(|v| lenient_u32(v, 0, "Dependencies/minVersion"))
                    .unwrap_or(0),
                must_load: item
                    .get("mustLoad")
                    .map(|v| lenient_bool(v, false, "Dependencies/mustLoad"))
                    .unwrap_or(false),
            });
        }
    }

    BaseInfo {
        name: text("Name"),
        author: text("Author"),
        introduction: text("Introduction"),
        description: text("Description"),
        link: text("Link"),
        dependencies,
    }
}

fn parse_kind(v: &Value) -> PackageKind {
    match v.as_str() {
        Some("Module") => PackageKind::Module,
        Some("Asset") => PackageKind::Asset,
        _ => {
            warn!(field = "Type", value = %v, "invalid package type, using Asset");
            PackageKind::Asset
        }
    }
}

fn lenient_u32(v: &Value, default: u32, field: &str) -> u32 {
    let parsed = match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        warn!(field, value = %v, default, "invalid number in manifest");
        default
    })
}

fn lenient_bool(v: &Value, default: bool, field: &str) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        Value::String(s) if s.eq_ignore_ascii_case("false") => false,
        _ => {
            warn!(field, value = %v, default, "invalid boolean in manifest");
            default
        }
    }
}
