//! The single global sort order over cells, its equality families, and hash.
//!
//! Every structure that holds cells in sorted form (sorted files, in-memory
//! sorted tables, merge iterators) must agree on exactly this comparison
//! chain: row, family, qualifier ascending by unsigned bytes; timestamp
//! descending; type byte ascending; mvcc version descending.
//!
//! Timestamp and mvcc sort descending so that, for a fixed key, a forward
//! scan meets the most recent write and the most recent transaction-visible
//! write first; "latest version" reads become prefix scans instead of
//! secondary-index lookups.

use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
};

use super::Cell;

/// Compare two cells under the global sort order.
///
/// This is a strict total order: antisymmetric, transitive, and consistent
/// with [`equals`]. Byte slices compare lexicographically as unsigned bytes,
/// a shorter strict prefix ordering first.
pub fn compare(a: &Cell, b: &Cell) -> Ordering {
    a.row()
        .cmp(b.row())
        .then_with(|| a.family().cmp(b.family()))
        .then_with(|| a.qualifier().cmp(b.qualifier()))
        .then_with(|| b.timestamp().cmp(&a.timestamp()))
        .then_with(|| a.type_byte().cmp(&b.type_byte()))
        .then_with(|| b.mvcc().cmp(&a.mvcc()))
}

/// Full equality: row, family, qualifier, timestamp, type, and mvcc all
/// match.
pub fn equals(a: &Cell, b: &Cell) -> bool {
    a.row().len() == b.row().len()
        && a.family().len() == b.family().len()
        && a.qualifier().len() == b.qualifier().len()
        && compare(a, b) == Ordering::Equal
}

/// Equality with the mvcc term dropped from the chain entirely; timestamp
/// and type still participate. Used to recognise overwritten versions of
/// one logical write during dedup.
pub fn equals_ignore_mvcc(a: &Cell, b: &Cell) -> bool {
    a.row() == b.row()
        && a.family() == b.family()
        && a.qualifier() == b.qualifier()
        && a.timestamp() == b.timestamp()
        && a.type_byte() == b.type_byte()
}

/// Row-only equality.
pub fn equals_row(a: &Cell, b: &Cell) -> bool {
    a.row() == b.row()
}

/// Java-style 32-bit hash consistent with [`equals`]: row, family, and
/// qualifier byte-range hashes folded with multiplier 31, then truncated
/// timestamp, type byte, and truncated mvcc, in that order.
pub fn hash(cell: &Cell) -> i32 {
    let mut h = bytes_hash(cell.row());
    h = fold(h, bytes_hash(cell.family()));
    h = fold(h, bytes_hash(cell.qualifier()));
    h = fold(h, cell.timestamp() as i32);
    h = fold(h, i32::from(cell.type_byte()));
    fold(h, cell.mvcc() as i32)
}

/// Hash of an optional cell; an absent cell hashes to zero.
pub fn hash_opt(cell: Option<&Cell>) -> i32 {
    cell.map_or(0, hash)
}

#[inline]
fn fold(h: i32, term: i32) -> i32 {
    h.wrapping_mul(31).wrapping_add(term)
}

fn bytes_hash(bytes: &[u8]) -> i32 {
    let mut h: i32 = 1;
    for &b in bytes {
        h = fold(h, i32::from(b));
    }
    h
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        equals(self, other)
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.row().hash(state);
        self.family().hash(state);
        self.qualifier().hash(state);
        self.timestamp().hash(state);
        self.type_byte().hash(state);
        self.mvcc().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{super::codec, *};
    use crate::cell::CellType;

    fn cell(
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        ts: i64,
        kind: CellType,
        mvcc: u64,
    ) -> Cell {
        Cell::new(row, family, qualifier, ts, kind, b"v")
            .expect("valid cell")
            .with_mvcc(mvcc)
    }

    fn random_cell() -> Cell {
        let rows: [&[u8]; 4] = [b"a", b"ab", b"b", b"ba"];
        let families: [&[u8]; 2] = [b"f1", b"f2"];
        let qualifiers: [&[u8]; 3] = [b"", b"q", b"qq"];
        let kinds = [CellType::Minimum, CellType::Put, CellType::Delete];
        cell(
            rows[fastrand::usize(..rows.len())],
            families[fastrand::usize(..families.len())],
            qualifiers[fastrand::usize(..qualifiers.len())],
            fastrand::i64(0..4),
            kinds[fastrand::usize(..kinds.len())],
            fastrand::u64(0..4),
        )
    }

    #[test]
    fn key_fields_compare_ascending() {
        let a = cell(b"a", b"f", b"q", 1, CellType::Put, 1);
        let b = cell(b"b", b"f", b"q", 1, CellType::Put, 1);
        assert_eq!(compare(&a, &b), Ordering::Less);

        let fam1 = cell(b"a", b"f1", b"q", 1, CellType::Put, 1);
        let fam2 = cell(b"a", b"f2", b"q", 1, CellType::Put, 1);
        assert_eq!(compare(&fam1, &fam2), Ordering::Less);

        let q1 = cell(b"a", b"f", b"q1", 1, CellType::Put, 1);
        let q2 = cell(b"a", b"f", b"q2", 1, CellType::Put, 1);
        assert_eq!(compare(&q1, &q2), Ordering::Less);
    }

    #[test]
    fn prefix_rows_sort_before_longer_rows() {
        let short = cell(b"ab", b"f", b"q", 1, CellType::Put, 1);
        let long = cell(b"abc", b"f", b"q", 1, CellType::Put, 1);
        assert_eq!(compare(&short, &long), Ordering::Less);
    }

    #[test]
    fn newer_timestamps_sort_first() {
        let newer = cell(b"a", b"f", b"q", 10, CellType::Put, 1);
        let older = cell(b"a", b"f", b"q", 5, CellType::Put, 1);
        assert_eq!(compare(&newer, &older), Ordering::Less);
    }

    #[test]
    fn type_breaks_timestamp_ties_ascending() {
        let minimum = cell(b"a", b"f", b"q", 1, CellType::Minimum, 1);
        let put = cell(b"a", b"f", b"q", 1, CellType::Put, 1);
        let delete = cell(b"a", b"f", b"q", 1, CellType::Delete, 1);
        assert_eq!(compare(&minimum, &put), Ordering::Less);
        assert_eq!(compare(&put, &delete), Ordering::Less);
    }

    #[test]
    fn higher_mvcc_sorts_first() {
        let newer = cell(b"a", b"f", b"q", 1, CellType::Put, 9);
        let older = cell(b"a", b"f", b"q", 1, CellType::Put, 3);
        assert_eq!(compare(&newer, &older), Ordering::Less);
    }

    #[test]
    fn order_is_strict_and_transitive() {
        fastrand::seed(7);
        for _ in 0..2000 {
            let (a, b, c) = (random_cell(), random_cell(), random_cell());

            // Exactly one of <, ==, > holds, and the order is antisymmetric.
            assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
            assert_eq!(compare(&a, &a), Ordering::Equal);

            if compare(&a, &b) == Ordering::Less && compare(&b, &c) == Ordering::Less {
                assert_eq!(compare(&a, &c), Ordering::Less);
            }
        }
    }

    #[test]
    fn compare_is_consistent_with_equals() {
        fastrand::seed(11);
        for _ in 0..2000 {
            let (a, b) = (random_cell(), random_cell());
            assert_eq!(equals(&a, &b), compare(&a, &b) == Ordering::Equal);
        }
    }

    #[test]
    fn equals_implies_equal_hash() {
        fastrand::seed(13);
        for _ in 0..2000 {
            let (a, b) = (random_cell(), random_cell());
            if equals(&a, &b) {
                assert_eq!(hash(&a), hash(&b));
            }
        }
    }

    #[test]
    fn equals_ignore_mvcc_drops_only_the_version_term() {
        let a = cell(b"a", b"f", b"q", 1, CellType::Put, 9);
        let b = cell(b"a", b"f", b"q", 1, CellType::Put, 3);
        assert!(!equals(&a, &b));
        assert!(equals_ignore_mvcc(&a, &b));

        let other_ts = cell(b"a", b"f", b"q", 2, CellType::Put, 9);
        assert!(!equals_ignore_mvcc(&a, &other_ts));
        let other_type = cell(b"a", b"f", b"q", 1, CellType::Delete, 9);
        assert!(!equals_ignore_mvcc(&a, &other_type));
    }

    #[test]
    fn equals_row_ignores_everything_but_the_row() {
        let a = cell(b"row", b"f1", b"q1", 1, CellType::Put, 1);
        let b = cell(b"row", b"f2", b"q2", 9, CellType::Delete, 5);
        assert!(equals_row(&a, &b));
        let c = cell(b"other", b"f1", b"q1", 1, CellType::Put, 1);
        assert!(!equals_row(&a, &c));
    }

    #[test]
    fn absent_cell_hashes_to_zero() {
        let a = cell(b"a", b"f", b"q", 1, CellType::Put, 1);
        assert_eq!(hash_opt(None), 0);
        assert_eq!(hash_opt(Some(&a)), hash(&a));
        assert_ne!(hash(&a), 0);
    }

    #[test]
    fn row_successor_bounds_the_row() {
        let base = cell(b"row", b"f", b"q", 1, CellType::Put, 1);
        let successor = codec::row_successor(&base).expect("row can grow");

        // Greater than every cell with the original row, at any timestamp,
        // type, and version.
        for ts in [i64::MIN, 0, i64::MAX] {
            for kind in [CellType::Minimum, CellType::Put, CellType::Maximum] {
                for mvcc in [0, u64::MAX] {
                    let within = cell(b"row", b"zz", b"zz", ts, kind, mvcc);
                    assert_eq!(compare(&within, &successor), Ordering::Less);
                }
            }
        }

        // Less than any cell whose row is further away than one appended
        // zero byte.
        let beyond = cell(b"row\x00\x00", b"", b"", i64::MAX, CellType::Minimum, 0);
        assert_eq!(compare(&successor, &beyond), Ordering::Less);
        let next_row = cell(b"row0", b"f", b"q", 1, CellType::Put, 1);
        assert_eq!(compare(&successor, &next_row), Ordering::Less);
    }

    #[test]
    fn cells_sort_inside_std_collections() {
        let mut cells = vec![
            cell(b"b", b"f", b"q", 1, CellType::Put, 1),
            cell(b"a", b"f", b"q", 1, CellType::Put, 1),
            cell(b"a", b"f", b"q", 9, CellType::Put, 1),
        ];
        cells.sort();
        assert_eq!(cells[0].row(), b"a");
        assert_eq!(cells[0].timestamp(), 9);
        assert_eq!(cells[1].timestamp(), 1);
        assert_eq!(cells[2].row(), b"b");
    }
}
