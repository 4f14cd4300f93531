//! Voice model catalog: remote listing shapes and the merge with local model directories.

use crate::config::RuntimeMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A scalar value of free-form model metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Open key-value metadata attached to a model by its publisher
pub type ExtensionMetadata = BTreeMap<String, MetaValue>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub classification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub extra_info: ExtensionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One item of the remote catalog, as served
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteModelWeight {
    pub id: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "isHighQuality")]
    pub is_high_quality: Option<bool>,
    #[serde(default)]
    pub metadata: Option<ModelMetadata>,
}

/// One entry of a Hugging Face repo tree listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubTreeEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

impl HubTreeEntry {
    /// Zip files become catalog entries; directories and other files are skipped
    #[must_use]
    pub fn into_weight(self) -> Option<VoiceModelWeight> {
        if self.kind != "file" || !self.path.ends_with("zip") {
            return None;
        }
        Some(VoiceModelWeight::from(RemoteModelWeight {
            id: self.path,
            last_modified: None,
            size: self.size,
            name: None,
            is_high_quality: None,
            metadata: None,
        }))
    }
}

/// A downloadable voice model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceModelWeight {
    /// File stem of the remote archive; also the local directory name
    pub id: String,
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
    #[serde(
        default,
        rename = "isHighQuality",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_high_quality: Option<bool>,
}

impl From<RemoteModelWeight> for VoiceModelWeight {
    fn from(remote: RemoteModelWeight) -> Self {
        let id = file_stem(&remote.id);
        let name = remote
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        let last_modified = remote.last_modified.as_deref().and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        Self {
            id,
            name,
            last_modified,
            size: remote.size,
            metadata: remote.metadata,
            is_high_quality: remote.is_high_quality,
        }
    }
}

/// A catalog entry as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistModelOption {
    #[serde(flatten)]
    pub weight: VoiceModelWeight,
    pub downloaded: bool,
}

impl ArtistModelOption {
    /// Entry for a local directory with no catalog counterpart
    #[must_use]
    pub fn local_only(dir_name: &str) -> Self {
        Self {
            weight: VoiceModelWeight {
                id: dir_name.to_string(),
                name: dir_name.to_string(),
                last_modified: None,
                size: 0,
                metadata: None,
                is_high_quality: None,
            },
            downloaded: true,
        }
    }
}

/// Merge the remote catalog with local model directories.
///
/// A remote entry is downloaded when it is not in flight and a directory named after its id
/// exists. Without a local filesystem every remote entry counts as downloaded. Directories
/// with no catalog counterpart are appended as local-only entries.
pub fn merge_catalog(
    remote: &[VoiceModelWeight],
    local_dirs: &[String],
    mode: RuntimeMode,
    is_in_flight: impl Fn(&str) -> bool,
) -> Vec<ArtistModelOption> {
    let local: HashSet<&str> = local_dirs.iter().map(String::as_str).collect();

    let mut options: Vec<ArtistModelOption> = remote
        .iter()
        .map(|weight| {
            let downloaded = if mode.has_local_filesystem {
                !is_in_flight(&weight.id) && local.contains(weight.id.as_str())
            } else {
                true
            };
            ArtistModelOption {
                weight: weight.clone(),
                downloaded,
            }
        })
        .collect();

    let remote_ids: HashSet<&str> = remote.iter().map(|w| w.id.as_str()).collect();
    options.extend(
        local_dirs
            .iter()
            .filter(|dir| {
                !remote_ids.contains(dir.as_str()) && !remote_ids.contains(file_stem(dir).as_str())
            })
            .map(|dir| ArtistModelOption::local_only(dir)),
    );

    options.retain(|option| !option.weight.name.trim().is_empty());
    order_options(options)
}

/// Sort by display name, then move downloaded entries ahead of the rest.
/// Both steps are stable.
#[must_use]
pub fn order_options(mut options: Vec<ArtistModelOption>) -> Vec<ArtistModelOption> {
    options.sort_by(|a, b| a.weight.name.cmp(&b.weight.name));
    let (mut downloaded, not_downloaded): (Vec<_>, Vec<_>) =
        options.into_iter().partition(|option| option.downloaded);
    downloaded.extend(not_downloaded);
    downloaded
}

/// "my_coolVoice-2" -> "My Cool Voice 2"
#[must_use]
pub fn start_case(id: &str) -> String {
    let mut words: Vec<String> = Vec::new();

    for chunk in id.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut prev: Option<char> = None;
        for c in chunk.chars() {
            let boundary = prev.is_some_and(|p| {
                (p.is_lowercase() && c.is_uppercase())
                    || (p.is_alphabetic() && c.is_numeric())
                    || (p.is_numeric() && c.is_alphabetic())
            });
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.push(c);
            prev = Some(c);
        }
        if !current.is_empty() {
            words.push(current);
        }
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map_or_else(|| name.to_string(), |stem| stem.to_string_lossy().into_owned())
}
