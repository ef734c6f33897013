//! Period and region partitioning of retrieved passages.
//!
//! Large passage sets are split into partitions processed by independent
//! LLM calls: by time period (earliest explicit year mention mapped
//! through a fixed period table) or by geography (first gazetteer match
//! in the text). Both tables are configuration; the defaults reflect the
//! corpus conventions.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::retrieval::RetrievedPassage;

/// Partition label for passages with no year when no dated partition
/// exists to absorb them.
pub const UNDATED_LABEL: &str = "undated";

/// Partition label for passages with no gazetteer match when no located
/// partition exists to absorb them.
pub const UNLOCATED_LABEL: &str = "general";

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\b(1[0-9]{3}|20[0-9]{2})\b").unwrap()
});

/// Extracts all explicit year mentions (1000–2099) in text order.
#[must_use]
pub fn extract_years(text: &str) -> Vec<i32> {
    YEAR_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Returns the chronologically earliest year mentioned, if any.
#[must_use]
pub fn earliest_year(text: &str) -> Option<i32> {
    extract_years(text).into_iter().min()
}

/// One row of the period table: a label and an inclusive year range.
#[derive(Debug, Clone)]
pub struct PeriodBound {
    /// Partition label (e.g. `"1850–1899"`).
    pub label: String,
    /// First year of the period; `None` means open at the start.
    pub start: Option<i32>,
    /// Last year of the period; `None` means open at the end.
    pub end: Option<i32>,
}

/// Ordered table of period boundaries.
#[derive(Debug, Clone)]
pub struct PeriodTable {
    bounds: Vec<PeriodBound>,
}

impl PeriodTable {
    /// Builds a table from `(label, start, end)` rows, in chronological order.
    #[must_use]
    pub fn new(rows: Vec<PeriodBound>) -> Self {
        Self { bounds: rows }
    }

    /// The corpus default table.
    #[must_use]
    pub fn default_table() -> Self {
        let row = |label: &str, start: Option<i32>, end: Option<i32>| PeriodBound {
            label: label.to_string(),
            start,
            end,
        };
        Self::new(vec![
            row("pre-1600", None, Some(1599)),
            row("1600–1699", Some(1600), Some(1699)),
            row("1700–1799", Some(1700), Some(1799)),
            row("1800–1849", Some(1800), Some(1849)),
            row("1850–1899", Some(1850), Some(1899)),
            row("1900–1945", Some(1900), Some(1945)),
            row("1946–1999", Some(1946), Some(1999)),
            row("2000+", Some(2000), None),
        ])
    }

    /// Maps a year to its period label.
    #[must_use]
    pub fn label_for_year(&self, year: i32) -> Option<&str> {
        self.bounds
            .iter()
            .find(|b| b.start.is_none_or(|s| year >= s) && b.end.is_none_or(|e| year <= e))
            .map(|b| b.label.as_str())
    }

    /// Labels in chronological order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.bounds.iter().map(|b| b.label.as_str()).collect()
    }
}

/// Gazetteer mapping place aliases (including historical names) to
/// region labels.
#[derive(Debug, Clone)]
pub struct Gazetteer {
    /// `(lowercase alias, region label)` pairs.
    entries: Vec<(String, String)>,
}

impl Gazetteer {
    /// Builds a gazetteer from `(alias, label)` pairs.
    #[must_use]
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// The corpus default gazetteer.
    #[must_use]
    pub fn default_gazetteer() -> Self {
        const PLACES: &[(&str, &str)] = &[
            ("london", "london"),
            ("england", "london"),
            ("paris", "paris"),
            ("france", "paris"),
            ("vienna", "vienna"),
            ("austria", "vienna"),
            ("berlin", "berlin"),
            ("prussia", "berlin"),
            ("germany", "berlin"),
            ("frankfurt", "frankfurt"),
            ("hamburg", "hamburg"),
            ("amsterdam", "amsterdam"),
            ("new york", "new york"),
            ("new orleans", "new orleans"),
            ("philadelphia", "philadelphia"),
            ("montgomery", "montgomery"),
            ("san francisco", "san francisco"),
            ("st petersburg", "st petersburg"),
            ("constantinople", "istanbul"),
            ("istanbul", "istanbul"),
            ("alexandria", "alexandria"),
            ("cairo", "cairo"),
            ("beirut", "beirut"),
            ("baghdad", "baghdad"),
            ("bombay", "bombay"),
            ("calcutta", "calcutta"),
            ("shanghai", "shanghai"),
            ("hong kong", "hong kong"),
            ("buenos aires", "buenos aires"),
            ("rio de janeiro", "rio de janeiro"),
            ("lagos", "lagos"),
            ("kano", "kano"),
        ];
        Self::new(
            PLACES
                .iter()
                .map(|(alias, label)| ((*alias).to_string(), (*label).to_string()))
                .collect(),
        )
    }

    /// Returns the label of the alias appearing earliest in the text.
    #[must_use]
    pub fn first_region(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.entries
            .iter()
            .filter_map(|(alias, label)| {
                lowered.find(alias.as_str()).map(|pos| (pos, label.as_str()))
            })
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, label)| label)
    }

    /// Returns the distinct region labels mentioned, in first-mention order.
    #[must_use]
    pub fn regions_in(&self, text: &str) -> Vec<&str> {
        let lowered = text.to_lowercase();
        let mut found: Vec<(usize, &str)> = self
            .entries
            .iter()
            .filter_map(|(alias, label)| {
                lowered.find(alias.as_str()).map(|pos| (pos, label.as_str()))
            })
            .collect();
        found.sort_by_key(|(pos, _)| *pos);
        let mut labels: Vec<&str> = Vec::new();
        for (_, label) in found {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }
}

/// Assigns each passage to one period by its earliest year mention.
///
/// Undated passages merge into the latest non-empty period; when every
/// passage is undated they form a single [`UNDATED_LABEL`] partition.
/// Partitions come back in chronological order; the union equals the
/// input set and partitions are disjoint by construction.
#[must_use]
pub fn partition_by_period(
    passages: Vec<RetrievedPassage>,
    table: &PeriodTable,
) -> Vec<(String, Vec<RetrievedPassage>)> {
    let mut buckets: HashMap<&str, Vec<RetrievedPassage>> = HashMap::new();
    let mut undated: Vec<RetrievedPassage> = Vec::new();

    for passage in passages {
        match earliest_year(&passage.text).and_then(|y| table.label_for_year(y)) {
            Some(label) => buckets.entry(label).or_default().push(passage),
            None => undated.push(passage),
        }
    }

    let mut partitions: Vec<(String, Vec<RetrievedPassage>)> = table
        .labels()
        .into_iter()
        .filter_map(|label| {
            buckets
                .remove(label)
                .map(|bucket| (label.to_string(), bucket))
        })
        .collect();

    if !undated.is_empty() {
        if let Some((_, last)) = partitions.last_mut() {
            last.append(&mut undated);
        } else {
            partitions.push((UNDATED_LABEL.to_string(), undated));
        }
    }
    partitions
}

/// Assigns each passage to one region by the earliest gazetteer mention.
///
/// Partitions come back in first-seen order. Unlocated passages merge
/// into the largest partition; when nothing is located they form a single
/// [`UNLOCATED_LABEL`] partition.
#[must_use]
pub fn partition_by_region(
    passages: Vec<RetrievedPassage>,
    gazetteer: &Gazetteer,
) -> Vec<(String, Vec<RetrievedPassage>)> {
    let mut partitions: Vec<(String, Vec<RetrievedPassage>)> = Vec::new();
    let mut unlocated: Vec<RetrievedPassage> = Vec::new();

    for passage in passages {
        match gazetteer.first_region(&passage.text) {
            Some(label) => {
                if let Some((_, bucket)) =
                    partitions.iter_mut().find(|(existing, _)| existing == label)
                {
                    bucket.push(passage);
                } else {
                    partitions.push((label.to_string(), vec![passage]));
                }
            }
            None => unlocated.push(passage),
        }
    }

    if !unlocated.is_empty() {
        if let Some((_, largest)) = partitions
            .iter_mut()
            .max_by_key(|(_, bucket)| bucket.len())
        {
            largest.append(&mut unlocated);
        } else {
            partitions.push((UNLOCATED_LABEL.to_string(), unlocated));
        }
    }
    partitions
}

/// Reorders region partitions by the first year at which each region
/// mentions the event, for cross-regional chronology in event queries.
/// Regions with no year sort last; ties keep their first-seen order.
#[must_use]
pub fn order_regions_by_event_year(
    partitions: Vec<(String, Vec<RetrievedPassage>)>,
) -> Vec<(String, Vec<RetrievedPassage>)> {
    let mut keyed: Vec<(i32, (String, Vec<RetrievedPassage>))> = partitions
        .into_iter()
        .map(|(label, bucket)| {
            let year = bucket
                .iter()
                .filter_map(|p| earliest_year(&p.text))
                .min()
                .unwrap_or(i32::MAX);
            (year, (label, bucket))
        })
        .collect();
    keyed.sort_by_key(|(year, _)| *year);
    keyed.into_iter().map(|(_, partition)| partition).collect()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::retrieval::SourceTag;

    fn passage(id: &str, text: &str) -> RetrievedPassage {
        RetrievedPassage {
            chunk_id: id.to_string(),
            text: text.to_string(),
            score: 0.0,
            source: SourceTag::Keyword,
        }
    }

    #[test]
    fn test_extract_years() {
        assert_eq!(
            extract_years("Founded 1798, failed in the panic of 1873."),
            vec![1798, 1873]
        );
        assert!(extract_years("No dates here; 250 guilders.").is_empty());
    }

    #[test]
    fn test_earliest_year_is_minimum() {
        assert_eq!(earliest_year("By 1873 the house founded in 1798 was gone."), Some(1798));
    }

    #[test_case(1500, "pre-1600")]
    #[test_case(1650, "1600–1699")]
    #[test_case(1799, "1700–1799")]
    #[test_case(1800, "1800–1849")]
    #[test_case(1873, "1850–1899")]
    #[test_case(1914, "1900–1945")]
    #[test_case(1973, "1946–1999")]
    #[test_case(2008, "2000+")]
    fn test_period_label(year: i32, expected: &str) {
        let table = PeriodTable::default_table();
        assert_eq!(table.label_for_year(year), Some(expected));
    }

    #[test]
    fn test_partition_by_period_orders_chronologically() {
        let table = PeriodTable::default_table();
        let partitions = partition_by_period(
            vec![
                passage("a", "The crisis of 1931 hit Vienna."),
                passage("b", "Founded in 1798 in Frankfurt."),
                passage("c", "The 1866 collapse of the discount houses."),
            ],
            &table,
        );
        let labels: Vec<&str> = partitions.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, ["1700–1799", "1850–1899", "1900–1945"]);
    }

    #[test]
    fn test_undated_merges_into_latest_period() {
        let table = PeriodTable::default_table();
        let partitions = partition_by_period(
            vec![
                passage("a", "Events of 1873."),
                passage("b", "No year mentioned at all."),
            ],
            &table,
        );
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].0, "1850–1899");
        assert_eq!(partitions[0].1.len(), 2);
    }

    #[test]
    fn test_all_undated_forms_undated_partition() {
        let table = PeriodTable::default_table();
        let partitions =
            partition_by_period(vec![passage("a", "No year."), passage("b", "None here.")], &table);
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].0, UNDATED_LABEL);
    }

    #[test]
    fn test_partition_coverage_and_disjointness() {
        let table = PeriodTable::default_table();
        let input = vec![
            passage("a", "1801."),
            passage("b", "1901."),
            passage("c", "1851."),
            passage("d", "undated"),
        ];
        let partitions = partition_by_period(input, &table);
        let mut ids: Vec<&str> = partitions
            .iter()
            .flat_map(|(_, bucket)| bucket.iter().map(|p| p.chunk_id.as_str()))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_first_region_earliest_mention_wins() {
        let gazetteer = Gazetteer::default_gazetteer();
        assert_eq!(
            gazetteer.first_region("While Paris panicked, London held."),
            Some("paris")
        );
    }

    #[test]
    fn test_regions_in_first_mention_order() {
        let gazetteer = Gazetteer::default_gazetteer();
        let regions = gazetteer.regions_in("Vienna wired Berlin, then Vienna again.");
        assert_eq!(regions, ["vienna", "berlin"]);
    }

    #[test]
    fn test_historical_alias_maps_to_label() {
        let gazetteer = Gazetteer::default_gazetteer();
        assert_eq!(
            gazetteer.first_region("The branch in Constantinople reopened."),
            Some("istanbul")
        );
    }

    #[test]
    fn test_partition_by_region_unlocated_merges_into_largest() {
        let gazetteer = Gazetteer::default_gazetteer();
        let partitions = partition_by_region(
            vec![
                passage("a", "London first."),
                passage("b", "London again."),
                passage("c", "Paris once."),
                passage("d", "Nowhere in particular."),
            ],
            &gazetteer,
        );
        let london = partitions
            .iter()
            .find(|(label, _)| label == "london")
            .map(|(_, bucket)| bucket.len());
        assert_eq!(london, Some(3));
    }

    #[test]
    fn test_order_regions_by_event_year() {
        let partitions = vec![
            (
                "new york".to_string(),
                vec![passage("a", "The 1914 closure of the exchange.")],
            ),
            (
                "london".to_string(),
                vec![passage("b", "Pressure began in July 1913 in the City.")],
            ),
            ("cairo".to_string(), vec![passage("c", "No year at all.")]),
        ];
        let ordered = order_regions_by_event_year(partitions);
        let labels: Vec<&str> = ordered.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, ["london", "new york", "cairo"]);
    }
}
