use crate::junk::{JunkCategory, JunkCategoryResult};
use crate::model::{DirEntry, FileTypeTag, RiskLevel, StorageNode};
use crate::tree::TreeIndex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimum pack size for the "Biggest Wins" guided bucket.
pub const BIGGEST_WIN_MIN_BYTES: u64 = 300 * 1024 * 1024;

/// A named, risk-leveled cleanup opportunity. Rebuilt fresh each scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimPack {
    pub id: String,
    pub name: String,
    pub rationale: String,
    pub risk: RiskLevel,
    pub reclaimable_bytes: u64,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    Developer,
    Creator,
    Gamer,
    Office,
}

impl Persona {
    fn markers(&self) -> &'static [&'static str] {
        match self {
            Persona::Developer => &[
                "Library/Developer",
                "DerivedData",
                ".cargo",
                ".rustup",
                ".npm",
                "CocoaPods",
            ],
            Persona::Creator => &["Final Cut", "Adobe", "Logic", "Premiere", "Lightroom", "DaVinci"],
            Persona::Gamer => &["Steam", "Epic Games", "Battle.net", "Riot Games", "GOG"],
            Persona::Office => &["Microsoft", "Zoom", "Teams", "Slack", "Notion"],
        }
    }

    fn rationale(&self) -> &'static str {
        match self {
            Persona::Developer => "Build caches and toolchain artifacts regenerate on demand",
            Persona::Creator => "Render caches and media previews can be rebuilt by their apps",
            Persona::Gamer => "Game installers and shader caches are re-downloadable",
            Persona::Office => "Meeting recordings and app caches accumulate quietly",
        }
    }

    const ALL: [Persona; 4] = [
        Persona::Developer,
        Persona::Creator,
        Persona::Gamer,
        Persona::Office,
    ];
}

/// A reclaim grouping keyed by inferred usage pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaBundle {
    pub persona: Persona,
    pub rationale: String,
    pub total_bytes: u64,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidedBucket {
    BiggestWins,
    LowRiskHygiene,
    Advanced,
    FinalReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidedStep {
    pub bucket: GuidedBucket,
    pub title: String,
    pub description: String,
    pub pack_ids: Vec<String>,
}

fn category_risk(category: JunkCategory) -> RiskLevel {
    match category {
        JunkCategory::BrowserCaches
        | JunkCategory::Trash
        | JunkCategory::TempFiles
        | JunkCategory::Logs => RiskLevel::Low,
        JunkCategory::OldDownloads => RiskLevel::Medium,
    }
}

fn category_rationale(category: JunkCategory) -> &'static str {
    match category {
        JunkCategory::OldDownloads => "Downloads untouched for a month are usually forgotten",
        JunkCategory::BrowserCaches => "Browsers rebuild their caches automatically",
        JunkCategory::Logs => "Old log files are safe to remove",
        JunkCategory::Trash => "Already marked for deletion",
        JunkCategory::TempFiles => "Temporary files left behind by applications",
    }
}

const DEV_ARTIFACT_MARKERS: &[&str] = &[
    "Library/Developer",
    ".cargo/registry",
    ".rustup/toolchains",
    ".npm/_cacache",
    "CocoaPods",
];

/// Builds reclaim packs from junk-category results, large archive/disk-image
/// files observed during scanning, and developer artifacts in the tree.
/// Output is sorted by reclaimable bytes, descending.
pub fn build_packs(
    junk: &[JunkCategoryResult],
    large_files: &[DirEntry],
    tree: &TreeIndex,
) -> Vec<ReclaimPack> {
    let mut packs = Vec::new();

    for result in junk {
        if result.bytes == 0 {
            continue;
        }
        packs.push(ReclaimPack {
            id: format!("junk-{:?}", result.category).to_ascii_lowercase(),
            name: result.category.to_string(),
            rationale: category_rationale(result.category).to_string(),
            risk: category_risk(result.category),
            reclaimable_bytes: result.bytes,
            paths: result.paths.clone(),
        });
    }

    let archives: Vec<&DirEntry> = large_files
        .iter()
        .filter(|e| {
            matches!(
                e.path.extension().and_then(|x| x.to_str()),
                Some("zip" | "dmg" | "iso" | "tar" | "gz" | "7z" | "rar" | "sparseimage")
            )
        })
        .collect();
    if !archives.is_empty() {
        packs.push(ReclaimPack {
            id: "large-archives".to_string(),
            name: "Archives & disk images".to_string(),
            rationale: "Installers and archives are usually expendable once applied".to_string(),
            risk: RiskLevel::Medium,
            reclaimable_bytes: archives.iter().map(|e| e.size).sum(),
            paths: archives.iter().map(|e| e.path.clone()).collect(),
        });
    }

    let dev_nodes: Vec<&StorageNode> = tree
        .iter_nodes()
        .filter(|n| {
            let s = n.path.to_string_lossy();
            n.reclaimable_bytes() > 0 && DEV_ARTIFACT_MARKERS.iter().any(|m| s.contains(m))
        })
        .collect();
    if !dev_nodes.is_empty() {
        packs.push(ReclaimPack {
            id: "dev-artifacts".to_string(),
            name: "Developer artifacts".to_string(),
            rationale: "Toolchains and package caches regenerate on the next build".to_string(),
            risk: RiskLevel::Medium,
            reclaimable_bytes: dev_nodes.iter().map(|n| n.reclaimable_bytes()).sum(),
            paths: dev_nodes.iter().map(|n| n.path.clone()).collect(),
        });
    }

    packs.sort_by(|a, b| b.reclaimable_bytes.cmp(&a.reclaimable_bytes));
    packs
}

/// Groups indexed nodes by usage pattern. Each bundle carries its candidate
/// paths sorted descending by size.
pub fn build_persona_bundles(tree: &TreeIndex) -> Vec<PersonaBundle> {
    let mut bundles = Vec::new();
    for persona in Persona::ALL {
        let mut hits: Vec<&StorageNode> = tree
            .iter_nodes()
            .filter(|n| {
                let s = n.path.to_string_lossy();
                n.reclaimable_bytes() > 0 && persona.markers().iter().any(|m| s.contains(m))
            })
            .collect();
        if hits.is_empty() {
            continue;
        }
        hits.sort_by(|a, b| b.logical_bytes.cmp(&a.logical_bytes));
        bundles.push(PersonaBundle {
            persona,
            rationale: persona.rationale().to_string(),
            total_bytes: hits.iter().map(|n| n.reclaimable_bytes()).sum(),
            paths: hits.iter().map(|n| n.path.clone()).collect(),
        });
    }
    bundles.sort_by(|a, b| b.total_bytes.cmp(&a.total_bytes));
    bundles
}

/// Partitions packs into guided steps. Assignment is first-match-wins over a
/// fixed order in which risk outranks size: Low-risk packs always land in
/// hygiene, however large; Biggest Wins then collects the remaining packs at
/// or above the 300 MB threshold that are neither high-risk nor protected;
/// what is left (medium under-threshold, high) is Advanced. The final-review
/// step always closes the list.
pub fn guided_steps(packs: &[ReclaimPack], cart_size: usize) -> Vec<GuidedStep> {
    let mut hygiene = Vec::new();
    let mut biggest = Vec::new();
    let mut advanced = Vec::new();

    for pack in packs {
        if pack.risk == RiskLevel::Low {
            hygiene.push(pack.id.clone());
        } else if pack.reclaimable_bytes >= BIGGEST_WIN_MIN_BYTES
            && !matches!(pack.risk, RiskLevel::High | RiskLevel::Protected)
        {
            biggest.push(pack.id.clone());
        } else {
            advanced.push(pack.id.clone());
        }
    }

    let mut steps = Vec::new();
    if !biggest.is_empty() {
        steps.push(GuidedStep {
            bucket: GuidedBucket::BiggestWins,
            title: "Biggest Wins".to_string(),
            description: "Large, reversible cleanups first".to_string(),
            pack_ids: biggest,
        });
    }
    if !hygiene.is_empty() {
        steps.push(GuidedStep {
            bucket: GuidedBucket::LowRiskHygiene,
            title: "Low-Risk Hygiene".to_string(),
            description: "Caches, logs and trash that rebuild themselves".to_string(),
            pack_ids: hygiene,
        });
    }
    if !advanced.is_empty() {
        steps.push(GuidedStep {
            bucket: GuidedBucket::Advanced,
            title: "Advanced".to_string(),
            description: "Look closely before removing these".to_string(),
            pack_ids: advanced,
        });
    }
    steps.push(GuidedStep {
        bucket: GuidedBucket::FinalReview,
        title: "Final Review".to_string(),
        description: format!("{} item(s) currently in the cart", cart_size),
        pack_ids: Vec::new(),
    });
    steps
}

/// Large disk-image/archive detection used by pack building; exposed for the
/// tree-analysis path as well.
pub fn is_archive_like(node: &StorageNode) -> bool {
    matches!(node.file_type, FileTypeTag::Archive | FileTypeTag::DiskImage)
}
