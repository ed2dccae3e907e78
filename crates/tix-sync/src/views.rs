//! Derived views. Everything here is a pure function of its inputs; the
//! pipeline decides what gets written where.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tix_adapters::{AdExportAdapter, AdapterError, ParsedArtifact};
use tix_core::{normalize_date_key, DailyTotal, ImpactRow, Record, Table, IMPACT_HEADER};
use tracing::{debug, warn};

use crate::config::{AdColumns, SalesColumns};
use crate::ledger::{PROVENANCE_COLUMN, SNAPSHOT_TIMESTAMP_COLUMN};

/// Ticket count from a raw cell. Thousands separators are ignored, blank is
/// zero, and anything unreadable counts as zero.
pub fn parse_quantity(raw: &str) -> i64 {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return 0;
    }
    if let Ok(v) = cleaned.parse::<i64>() {
        return v;
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v.round() as i64,
        _ => {
            warn!(value = raw, "unreadable quantity counted as zero");
            0
        }
    }
}

/// Ad metric from a raw cell. Thousands separators, a leading currency
/// symbol and a trailing percent sign are allowed; blank is zero and
/// anything else unreadable counts as zero.
pub fn parse_metric(raw: &str) -> f64 {
    let cleaned = raw
        .trim()
        .trim_start_matches(|c: char| matches!(c, '¥' | '$' | '€' | '£'))
        .trim_end_matches('%')
        .trim()
        .replace(',', "");
    if cleaned.is_empty() {
        return 0.0;
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            warn!(value = raw, "unreadable ad metric counted as zero");
            0.0
        }
    }
}

/// Per-date totals over the whole ledger, sorted by date key. `None` when a
/// configured column is missing from the ledger.
pub fn compute_daily_totals(ledger: &Table, columns: &SalesColumns) -> Option<Vec<DailyTotal>> {
    let date_idx = ledger.column_index(&columns.date_column)?;
    let category_idx = ledger.column_index(&columns.category_column)?;
    let quantity_idx = ledger.column_index(&columns.quantity_column)?;
    let primary = columns.primary_category.trim();

    let mut buckets: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for row in &ledger.rows {
        let date = normalize_date_key(Table::cell(row, date_idx));
        if date.is_empty() {
            debug!("ledger row without a date skipped");
            continue;
        }
        let quantity = parse_quantity(Table::cell(row, quantity_idx));
        let bucket = buckets.entry(date).or_default();
        if Table::cell(row, category_idx).trim() == primary {
            bucket.0 = bucket.0.saturating_add(quantity);
        } else {
            bucket.1 = bucket.1.saturating_add(quantity);
        }
    }

    Some(
        buckets
            .into_iter()
            .map(|(date, (p, s))| DailyTotal::new(date, p, s))
            .collect(),
    )
}

pub fn daily_totals_table(totals: &[DailyTotal], columns: &SalesColumns) -> Table {
    Table::new(
        DailyTotal::header(&columns.primary_label, &columns.secondary_label),
        totals.iter().map(DailyTotal::to_record).collect(),
    )
}

/// Decode a previously written daily totals table; undecodable rows are dropped.
pub fn daily_totals_from_table(table: &Table) -> Vec<DailyTotal> {
    table.rows.iter().filter_map(DailyTotal::from_record).collect()
}

pub const DELTA_PERIOD_COLUMNS: [&str; 2] = ["period_start", "period_end"];
pub const DELTA_VALUE_COLUMNS: [&str; 2] = ["delta", "cumulative_total"];

/// Sales movement between consecutive snapshots in the ledger.
///
/// For each key present in a snapshot, the delta is its quantity minus the
/// quantity under the same key in the previous snapshot (zero if absent);
/// only non-zero deltas are emitted. `None` when a required column is
/// missing.
pub fn compute_snapshot_deltas(ledger: &Table, columns: &SalesColumns) -> Option<Table> {
    let provenance_idx = ledger.column_index(PROVENANCE_COLUMN)?;
    let snapshot_ts_idx = ledger.column_index(SNAPSHOT_TIMESTAMP_COLUMN)?;
    let quantity_idx = ledger.column_index(&columns.quantity_column)?;
    let category_idx = ledger.column_index(&columns.category_column)?;
    let key_idx = columns
        .delta_key_columns
        .iter()
        .map(|c| ledger.column_index(c))
        .collect::<Option<Vec<_>>>()?;
    let category_in_key = columns
        .delta_key_columns
        .iter()
        .any(|c| c.trim() == columns.category_column.trim());

    let mut header = DELTA_PERIOD_COLUMNS.map(String::from).to_vec();
    header.extend(columns.delta_key_columns.iter().cloned());
    if !category_in_key {
        header.push(columns.category_column.clone());
    }
    header.extend(DELTA_VALUE_COLUMNS.map(String::from));

    struct Snapshot {
        timestamp: String,
        order: Vec<Vec<String>>,
        lines: HashMap<Vec<String>, (i64, String)>,
    }

    let mut snapshots: Vec<Snapshot> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    for row in &ledger.rows {
        let name = Table::cell(row, provenance_idx).to_string();
        let slot = *position.entry(name).or_insert_with(|| {
            snapshots.push(Snapshot {
                timestamp: Table::cell(row, snapshot_ts_idx).to_string(),
                order: Vec::new(),
                lines: HashMap::new(),
            });
            snapshots.len() - 1
        });
        let snapshot = &mut snapshots[slot];
        let key = key_idx
            .iter()
            .map(|i| Table::cell(row, *i).trim().to_string())
            .collect::<Vec<_>>();
        let value = (
            parse_quantity(Table::cell(row, quantity_idx)),
            Table::cell(row, category_idx).trim().to_string(),
        );
        if snapshot.lines.insert(key.clone(), value).is_none() {
            snapshot.order.push(key);
        }
    }

    let mut rows = Vec::new();
    for pair in snapshots.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        for key in &curr.order {
            let Some((current, category)) = curr.lines.get(key) else {
                continue;
            };
            let previous = prev.lines.get(key).map(|(q, _)| *q).unwrap_or(0);
            let delta = current.saturating_sub(previous);
            if delta == 0 {
                continue;
            }
            let mut row: Record = vec![prev.timestamp.clone(), curr.timestamp.clone()];
            row.extend(key.iter().cloned());
            if !category_in_key {
                row.push(category.clone());
            }
            row.push(delta.to_string());
            row.push(current.to_string());
            rows.push(row);
        }
    }

    Some(Table::new(header, rows))
}

/// Flatten parsed ad exports into one table with a provenance column.
/// The first export fixes the header; any later export with a different
/// header is rejected.
pub fn merge_ad_exports(parsed: &[ParsedArtifact]) -> Result<Table, AdapterError> {
    let Some(first) = parsed.first() else {
        return Ok(Table::default());
    };
    let mut header = first.header.clone();
    header.push(PROVENANCE_COLUMN.to_string());

    let mut rows = Vec::new();
    for export in parsed {
        AdExportAdapter::check_header(&first.header, export)?;
        rows.extend(export.rows.iter().map(|row| {
            let mut out = row.clone();
            out.push(export.name.clone());
            out
        }));
    }
    Ok(Table::new(header, rows))
}

/// Summed ad metrics for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdDay {
    pub spend: f64,
    pub impressions: f64,
    pub clicks: f64,
    pub purchases: f64,
}

/// Ad metrics summed per day across every export. An empty table yields an
/// empty lookup; a table missing a configured column yields `None`.
pub fn aggregate_ads_by_day(ads: &Table, columns: &AdColumns) -> Option<BTreeMap<String, AdDay>> {
    if ads.header.is_empty() {
        return Some(BTreeMap::new());
    }
    let day_idx = ads.column_index(&columns.day_column)?;
    let spend_idx = ads.column_index(&columns.spend_column)?;
    let impressions_idx = ads.column_index(&columns.impressions_column)?;
    let clicks_idx = ads.column_index(&columns.clicks_column)?;
    let purchases_idx = ads.column_index(&columns.purchases_column)?;

    let mut out: BTreeMap<String, AdDay> = BTreeMap::new();
    for row in &ads.rows {
        let day = normalize_date_key(Table::cell(row, day_idx));
        if day.is_empty() {
            continue;
        }
        let entry = out.entry(day).or_default();
        entry.spend += parse_metric(Table::cell(row, spend_idx));
        entry.impressions += parse_metric(Table::cell(row, impressions_idx));
        entry.clicks += parse_metric(Table::cell(row, clicks_idx));
        entry.purchases += parse_metric(Table::cell(row, purchases_idx));
    }
    Some(out)
}

/// Outer join of daily ticket totals and per-day ad metrics over the union
/// of their dates.
///
/// Cost per ticket and return ratio need both tickets and spend to be
/// positive; click-through needs positive impressions. Otherwise they stay
/// `None`. A date whose daily total row exists but sums to zero is treated
/// like a date with no sales, so spend on it leaves the return ratio blank
/// rather than `0.00`.
pub fn compute_impact(
    daily: &[DailyTotal],
    ads: &Table,
    columns: &AdColumns,
    average_ticket_price: f64,
) -> Option<Vec<ImpactRow>> {
    let ad_by_day = aggregate_ads_by_day(ads, columns)?;
    let tickets_by_day = daily
        .iter()
        .map(|d| (d.date.clone(), d.total))
        .collect::<BTreeMap<_, _>>();

    let dates = tickets_by_day
        .keys()
        .chain(ad_by_day.keys())
        .cloned()
        .collect::<BTreeSet<_>>();

    Some(
        dates
            .into_iter()
            .map(|date| {
                let tickets = tickets_by_day.get(&date).copied().unwrap_or(0);
                let ad = ad_by_day.get(&date).copied().unwrap_or_default();
                let both_sides = tickets > 0 && ad.spend > 0.0;
                ImpactRow {
                    cost_per_ticket: both_sides.then(|| ad.spend / tickets as f64),
                    return_ratio: both_sides
                        .then(|| tickets as f64 * average_ticket_price / ad.spend),
                    click_through_pct: (ad.impressions > 0.0)
                        .then(|| ad.clicks / ad.impressions * 100.0),
                    date,
                    tickets_sold: tickets,
                    spend: ad.spend,
                    impressions: ad.impressions,
                    clicks: ad.clicks,
                    purchases: ad.purchases,
                }
            })
            .collect(),
    )
}

pub fn impact_table(rows: &[ImpactRow]) -> Table {
    Table::new(
        IMPACT_HEADER.map(String::from).to_vec(),
        rows.iter().map(ImpactRow::to_record).collect(),
    )
}
