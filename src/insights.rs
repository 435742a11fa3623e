use crate::collab::VolumeUsage;
use crate::history::StorageScanHistoryEntry;
use crate::model::StorageDomain;
use crate::planner::ReclaimPack;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// Space the OS reports as used but the index never saw.
    HiddenSpace,
    /// Space macOS can reclaim on its own (snapshots, purgeable caches).
    Purgeable,
    /// Index total exceeds what the volume reports; usually hard links.
    UnknownGap,
    DominantDomain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageInsight {
    pub kind: InsightKind,
    pub title: String,
    pub detail: String,
    pub bytes: u64,
}

/// Explains the difference between OS-reported usage and what the scan
/// actually indexed, then names the domain that dominates what it did see.
pub fn volume_insights(
    usage: Option<VolumeUsage>,
    indexed_bytes: u64,
    domains: &HashMap<StorageDomain, u64>,
) -> Vec<StorageInsight> {
    let mut insights = Vec::new();

    if let Some(usage) = usage {
        if usage.used > indexed_bytes {
            let gap = usage.used - indexed_bytes;
            // small gaps are metadata noise, not worth surfacing
            if gap > GIB {
                insights.push(StorageInsight {
                    kind: InsightKind::HiddenSpace,
                    title: "Space outside the scan".to_string(),
                    detail: format!(
                        "The volume reports {} used but the scan indexed {}. The rest is \
                         system-managed: local snapshots, purgeable caches and areas the \
                         scan cannot read.",
                        human_bytes(usage.used),
                        human_bytes(indexed_bytes)
                    ),
                    bytes: gap,
                });
                // a large share of the gap is typically purgeable
                insights.push(StorageInsight {
                    kind: InsightKind::Purgeable,
                    title: "Purgeable space".to_string(),
                    detail: "macOS frees snapshot and cache space automatically when the \
                             volume runs low; no action needed."
                        .to_string(),
                    bytes: gap / 2,
                });
            }
        } else if indexed_bytes > usage.used {
            insights.push(StorageInsight {
                kind: InsightKind::UnknownGap,
                title: "Index exceeds volume usage".to_string(),
                detail: "Indexed totals count hard-linked files once per path; the volume \
                         stores them once."
                    .to_string(),
                bytes: indexed_bytes - usage.used,
            });
        }
    }

    if let Some((domain, bytes)) = domains.iter().max_by_key(|(_, b)| **b) {
        if *bytes > 0 {
            insights.push(StorageInsight {
                kind: InsightKind::DominantDomain,
                title: format!("{domain} dominates"),
                detail: format!(
                    "{} of the indexed space belongs to the {} domain.",
                    human_bytes(*bytes),
                    domain
                ),
                bytes: *bytes,
            });
        }
    }

    insights.sort_by(|a, b| b.bytes.cmp(&a.bytes));
    insights
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageForecast {
    /// Bytes of growth per day; negative when usage is shrinking.
    pub daily_growth_bytes: i64,
    pub estimated_days_to_full: Option<u32>,
    pub confidence: f64,
    pub based_on_scans: usize,
}

/// Least-squares fit of volume usage over the scan history. One data point
/// is not a trend, so the forecast degrades to "unknown" with low confidence.
pub fn forecast(history: &[StorageScanHistoryEntry]) -> StorageForecast {
    let points: Vec<(DateTime<Utc>, u64)> = history
        .iter()
        .filter(|e| e.volume_total > 0)
        .map(|e| (e.timestamp, e.volume_used))
        .collect();

    if points.len() < 2 {
        return StorageForecast {
            daily_growth_bytes: 0,
            estimated_days_to_full: None,
            confidence: 0.30,
            based_on_scans: points.len(),
        };
    }

    let origin = points.iter().map(|(t, _)| *t).min().unwrap_or_else(Utc::now);
    let xs: Vec<f64> = points
        .iter()
        .map(|(t, _)| (*t - origin).num_seconds() as f64 / 86_400.0)
        .collect();
    let ys: Vec<f64> = points.iter().map(|(_, u)| *u as f64).collect();

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let cov: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let var: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();

    // all scans at the same instant: no usable slope
    if var == 0.0 {
        return StorageForecast {
            daily_growth_bytes: 0,
            estimated_days_to_full: None,
            confidence: 0.30,
            based_on_scans: points.len(),
        };
    }

    let slope = cov / var;
    let latest_used = points
        .iter()
        .max_by_key(|(t, _)| *t)
        .map(|(_, u)| *u)
        .unwrap_or(0);
    let total = history
        .iter()
        .map(|e| e.volume_total)
        .max()
        .unwrap_or(latest_used);

    let days_to_full = if slope > 0.0 && total > latest_used {
        let days = (total - latest_used) as f64 / slope;
        // beyond ten years the extrapolation is meaningless
        (days < 3650.0).then(|| days.ceil() as u32)
    } else {
        None
    };

    // more scans, better fit
    let confidence = (0.5 + 0.05 * points.len() as f64).min(0.9);

    StorageForecast {
        daily_growth_bytes: slope as i64,
        estimated_days_to_full: days_to_full,
        confidence,
        based_on_scans: points.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageAnomaly {
    pub severity: Severity,
    pub title: String,
    pub detail: String,
    pub recommendation: String,
    pub bytes: u64,
}

const GROWTH_ANOMALY_BYTES: u64 = 10 * GIB;
const PACK_ANOMALY_BYTES: u64 = 5 * GIB;
const SYSTEM_DOMAIN_ANOMALY_BYTES: u64 = 50 * GIB;

/// Flags unusual conditions worth the user's attention: sudden growth since
/// the previous scan, an oversized reclaim pack, or a bloated system domain.
pub fn detect_anomalies(
    previous: Option<&StorageScanHistoryEntry>,
    current_used: u64,
    packs: &[ReclaimPack],
    domains: &HashMap<StorageDomain, u64>,
) -> Vec<StorageAnomaly> {
    let mut anomalies = Vec::new();

    if let Some(prev) = previous {
        if current_used > prev.volume_used {
            let growth = current_used - prev.volume_used;
            if growth > GROWTH_ANOMALY_BYTES {
                anomalies.push(StorageAnomaly {
                    severity: Severity::Warning,
                    title: "Rapid disk growth".to_string(),
                    detail: format!(
                        "Usage grew by {} since the scan on {}.",
                        human_bytes(growth),
                        prev.timestamp.format("%Y-%m-%d")
                    ),
                    recommendation: "Check the largest reclaim packs to find what is growing."
                        .to_string(),
                    bytes: growth,
                });
            }
        }
    }

    for pack in packs.iter().take(3) {
        if pack.reclaimable_bytes > PACK_ANOMALY_BYTES {
            anomalies.push(StorageAnomaly {
                severity: Severity::Info,
                title: format!("Large reclaim opportunity: {}", pack.name),
                detail: format!(
                    "\"{}\" alone would free {}.",
                    pack.name,
                    human_bytes(pack.reclaimable_bytes)
                ),
                recommendation: "Review and clean this pack first.".to_string(),
                bytes: pack.reclaimable_bytes,
            });
        }
    }

    if let Some(system) = domains.get(&StorageDomain::System) {
        if *system > SYSTEM_DOMAIN_ANOMALY_BYTES {
            anomalies.push(StorageAnomaly {
                severity: Severity::Warning,
                title: "System domain unusually large".to_string(),
                detail: format!("System files occupy {}.", human_bytes(*system)),
                recommendation: "Restarting clears some system caches; the rest is managed \
                                 by macOS."
                    .to_string(),
                bytes: *system,
            });
        }
    }

    anomalies.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.bytes.cmp(&a.bytes)));
    anomalies
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainShift {
    pub domain: StorageDomain,
    pub previous_bytes: u64,
    pub current_bytes: u64,
    pub delta_bytes: i64,
}

/// "What changed since last time" comparison against the most recent scan of
/// the same root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeShiftSummary {
    pub previous_scan: DateTime<Utc>,
    pub shifts: Vec<DomainShift>,
    pub narrative: String,
}

pub fn time_shift(
    previous: Option<&StorageScanHistoryEntry>,
    domains: &HashMap<StorageDomain, u64>,
) -> Option<TimeShiftSummary> {
    let prev = previous?;

    let mut all: Vec<StorageDomain> = prev.domains.keys().chain(domains.keys()).copied().collect();
    all.sort_by_key(|d| format!("{d}"));
    all.dedup();

    let mut shifts: Vec<DomainShift> = all
        .into_iter()
        .map(|domain| {
            let before = prev.domains.get(&domain).copied().unwrap_or(0);
            let after = domains.get(&domain).copied().unwrap_or(0);
            DomainShift {
                domain,
                previous_bytes: before,
                current_bytes: after,
                delta_bytes: after as i64 - before as i64,
            }
        })
        .filter(|s| s.delta_bytes != 0)
        .collect();
    shifts.sort_by_key(|s| -s.delta_bytes.abs());

    let narrative = match shifts.first() {
        Some(top) if top.delta_bytes > 0 => format!(
            "{} grew the most since {}: +{}.",
            top.domain,
            prev.timestamp.format("%Y-%m-%d"),
            human_bytes(top.delta_bytes as u64)
        ),
        Some(top) => format!(
            "{} shrank the most since {}: -{}.",
            top.domain,
            prev.timestamp.format("%Y-%m-%d"),
            human_bytes(top.delta_bytes.unsigned_abs())
        ),
        None => format!(
            "No domain-level change since {}.",
            prev.timestamp.format("%Y-%m-%d")
        ),
    };

    Some(TimeShiftSummary {
        previous_scan: prev.timestamp,
        shifts,
        narrative,
    })
}

pub fn human_bytes(bytes: u64) -> String {
    byte_unit::Byte::from_u64(bytes)
        .get_appropriate_unit(byte_unit::UnitType::Binary)
        .to_string()
}
