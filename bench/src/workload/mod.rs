//! Workload mixes: weighted tables over a closed set of operation kinds.

pub mod queries;
pub mod runner;

use std::fmt;

/// Rows returned by every "latest" style read.
pub const QUERY_LIMIT: usize = 100;
/// Upper bound (inclusive) of the random pagination offset.
pub const MAX_PAGE_OFFSET: usize = 5000;
/// Bulk size of the `insert` kind.
pub const INSERT_BATCH: usize = 1000;
/// Bulk size of the `insert_500` kind.
pub const INSERT_SMALL_BATCH: usize = 500;

/// Every store interaction a mix can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    ExactLookup,
    PrefixL1,
    PrefixL2,
    PrefixL3,
    PrefixL4,
    /// Level-3 prefix of a freshly generated path.
    PrefixCold,
    /// Level-2 prefix with a random pagination offset.
    PrefixOffset,
    CountWindow,
    ErrorRate,
    Insert,
    Insert500,
    InsertSingle,
}

impl OperationKind {
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::ExactLookup => "exact_lookup",
            OperationKind::PrefixL1 => "prefix_l1",
            OperationKind::PrefixL2 => "prefix_l2",
            OperationKind::PrefixL3 => "prefix_l3",
            OperationKind::PrefixL4 => "prefix_l4",
            OperationKind::PrefixCold => "prefix_cold",
            OperationKind::PrefixOffset => "prefix_offset",
            OperationKind::CountWindow => "count_window",
            OperationKind::ErrorRate => "error_rate",
            OperationKind::Insert => "insert",
            OperationKind::Insert500 => "insert_500",
            OperationKind::InsertSingle => "insert_single",
        }
    }

    /// Number of leading path segments the kind queries by, if it queries
    /// by prefix at all.
    pub fn prefix_depth(self) -> Option<usize> {
        match self {
            OperationKind::PrefixL1 => Some(1),
            OperationKind::PrefixL2
            | OperationKind::PrefixOffset
            | OperationKind::CountWindow
            | OperationKind::ErrorRate => Some(2),
            OperationKind::PrefixL3 | OperationKind::PrefixCold => Some(3),
            OperationKind::PrefixL4 => Some(4),
            OperationKind::ExactLookup
            | OperationKind::Insert
            | OperationKind::Insert500
            | OperationKind::InsertSingle => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The four named traffic shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MixName {
    /// Read-heavy analytic.
    A,
    /// Write-heavy with cold-prefix reads.
    B,
    /// Paginated reads.
    C,
    /// Realtime single-row writes.
    D,
}

impl MixName {
    pub fn mix(self) -> Mix {
        match self {
            MixName::A => Mix::new(self, MIX_A),
            MixName::B => Mix::new(self, MIX_B),
            MixName::C => Mix::new(self, MIX_C),
            MixName::D => Mix::new(self, MIX_D),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            MixName::A => "read-heavy analytic",
            MixName::B => "write-heavy, cold prefixes",
            MixName::C => "paginated reads",
            MixName::D => "realtime single-row writes",
        }
    }
}

impl fmt::Display for MixName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            MixName::A => "A",
            MixName::B => "B",
            MixName::C => "C",
            MixName::D => "D",
        };
        f.write_str(letter)
    }
}

const MIX_A: MixTable = MixTable::new(&[
    (0.6, OperationKind::PrefixL2),
    (0.8, OperationKind::PrefixL3),
    (0.9, OperationKind::ExactLookup),
    (1.0, OperationKind::CountWindow),
]);

const MIX_B: MixTable = MixTable::new(&[
    (0.7, OperationKind::Insert),
    (0.8, OperationKind::PrefixL2),
    (0.9, OperationKind::PrefixCold),
    (1.0, OperationKind::ErrorRate),
]);

const MIX_C: MixTable = MixTable::new(&[
    (0.4, OperationKind::PrefixOffset),
    (0.6, OperationKind::CountWindow),
    (0.8, OperationKind::ExactLookup),
    (1.0, OperationKind::Insert500),
]);

const MIX_D: MixTable = MixTable::new(&[
    (0.5, OperationKind::InsertSingle),
    (0.6, OperationKind::ExactLookup),
    (0.7, OperationKind::PrefixL1),
    (0.8, OperationKind::PrefixL2),
    (0.9, OperationKind::PrefixL3),
    (1.0, OperationKind::PrefixL4),
]);

/// Cumulative table with its final kind resolved at compile time, so an
/// empty table cannot be built.
#[derive(Debug, Clone, Copy)]
struct MixTable {
    entries: &'static [(f64, OperationKind)],
    last: OperationKind,
}

impl MixTable {
    const fn new(entries: &'static [(f64, OperationKind)]) -> Self {
        let last = match entries {
            [.., (_, kind)] => *kind,
            [] => panic!("mix table must not be empty"),
        };
        Self { entries, last }
    }
}

/// Ordered `(cumulative probability, kind)` table; the last entry is 1.0.
#[derive(Debug, Clone, Copy)]
pub struct Mix {
    name: MixName,
    table: &'static [(f64, OperationKind)],
    last: OperationKind,
}

impl Mix {
    fn new(name: MixName, table: MixTable) -> Self {
        Self {
            name,
            table: table.entries,
            last: table.last,
        }
    }

    pub fn name(&self) -> MixName {
        self.name
    }

    pub fn table(&self) -> &'static [(f64, OperationKind)] {
        self.table
    }

    /// First entry whose cumulative probability is strictly greater than
    /// `r`; draws at or beyond the final bound select the last entry.
    pub fn select(&self, r: f64) -> OperationKind {
        self.table
            .iter()
            .find(|(cumulative, _)| r < *cumulative)
            .map_or(self.last, |(_, kind)| *kind)
    }

    /// Distinct kinds in table order.
    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<OperationKind> = Vec::with_capacity(self.table.len());
        for (_, kind) in self.table {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_MIXES: [MixName; 4] = [MixName::A, MixName::B, MixName::C, MixName::D];

    #[test]
    fn tables_are_increasing_and_end_at_one() {
        for name in ALL_MIXES {
            let table = name.mix().table();
            assert!(!table.is_empty());
            for pair in table.windows(2) {
                assert!(pair[0].0 < pair[1].0, "mix {name} not increasing");
            }
            assert!(table[0].0 > 0.0);
            assert_eq!(table[table.len() - 1].0, 1.0);
        }
    }

    #[test]
    fn zero_selects_first_entry() {
        for name in ALL_MIXES {
            let mix = name.mix();
            assert_eq!(mix.select(0.0), mix.table()[0].1);
        }
    }

    #[test]
    fn draws_near_one_select_last_entry() {
        for name in ALL_MIXES {
            let mix = name.mix();
            let last = mix.table()[mix.table().len() - 1].1;
            assert_eq!(mix.select(0.999_999_999), last);
            assert_eq!(mix.select(1.0), last);
            assert_eq!(mix.select(1.5), last);
            assert_eq!(mix.select(f64::NAN), last);
        }
    }

    #[test]
    fn boundaries_belong_to_the_next_entry() {
        let mix = MixName::D.mix();
        assert_eq!(mix.select(0.499), OperationKind::InsertSingle);
        assert_eq!(mix.select(0.5), OperationKind::ExactLookup);
        assert_eq!(mix.select(0.65), OperationKind::PrefixL1);
        assert_eq!(mix.select(0.8), OperationKind::PrefixL3);

        let mix = MixName::A.mix();
        assert_eq!(mix.select(0.59), OperationKind::PrefixL2);
        assert_eq!(mix.select(0.6), OperationKind::PrefixL3);
        assert_eq!(mix.select(0.95), OperationKind::CountWindow);
    }

    #[test]
    fn kinds_are_distinct_and_ordered() {
        assert_eq!(
            MixName::B.mix().kinds(),
            vec![
                OperationKind::Insert,
                OperationKind::PrefixL2,
                OperationKind::PrefixCold,
                OperationKind::ErrorRate,
            ]
        );
    }

    #[test]
    fn prefix_depths() {
        assert_eq!(OperationKind::PrefixL4.prefix_depth(), Some(4));
        assert_eq!(OperationKind::PrefixCold.prefix_depth(), Some(3));
        assert_eq!(OperationKind::CountWindow.prefix_depth(), Some(2));
        assert_eq!(OperationKind::InsertSingle.prefix_depth(), None);
    }
}
