//! Manifest and diff wire types exchanged between client and receiver.

use crate::inventory::Inventory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One path the client believes should exist remotely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
}

/// Body of `POST /`.
///
/// `files` is optional at the type level so a request without it can be
/// answered with 400 rather than a generic deserialization failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiffRequest {
    #[serde(default)]
    pub files: Option<Vec<ManifestEntry>>,
}

impl DiffRequest {
    /// Build a request listing every path of an inventory.
    pub fn from_inventory(inventory: &Inventory) -> Self {
        Self {
            files: Some(
                inventory
                    .paths()
                    .map(|p| ManifestEntry {
                        file: p.to_string(),
                    })
                    .collect(),
            ),
        }
    }
}

/// What the receiver currently has for a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStat {
    pub size: u64,
    pub time: i64,
}

/// Response of `POST /`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResponse {
    /// Remote stat per requested path, `null` when the path does not exist.
    #[serde(rename = "filesToUpdate", default)]
    pub files_to_update: BTreeMap<String, Option<RemoteStat>>,
    /// Remote files the manifest did not mention.
    #[serde(rename = "filesToRemove", default)]
    pub files_to_remove: BTreeMap<String, bool>,
}

impl DiffResponse {
    /// Paths flagged for removal, in sorted order.
    pub fn removal_paths(&self) -> Vec<String> {
        self.files_to_remove
            .iter()
            .filter(|(_, flagged)| **flagged)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Response of `DELETE /?file=`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// The path a removal was attempted for, `null` when the path was refused.
    #[serde(rename = "fileRemoved")]
    pub file_removed: Option<String>,
    pub removed: bool,
}

/// Paths of `local` that must be uploaded given what the receiver reported.
///
/// A path needs upload when the receiver reported nothing for it, or when its
/// size or modification time differs from the local file. Sorted by path.
pub fn needs_upload(
    local: &Inventory,
    remote: &BTreeMap<String, Option<RemoteStat>>,
) -> Vec<String> {
    local
        .iter()
        .filter(|(path, stat)| match remote.get(*path) {
            Some(Some(remote)) => remote.size != stat.size || remote.time != stat.mtime,
            Some(None) | None => true,
        })
        .map(|(path, _)| path.to_string())
        .collect()
}
