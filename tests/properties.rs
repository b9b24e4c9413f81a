use std::collections::BTreeSet;
use std::fs;

use camino::Utf8PathBuf;
use proptest::prelude::*;

use kira_seqdb::domain::{ContributorKey, Field, Protocol, RecordId, RecordKey};
use kira_seqdb::index::Selection;
use kira_seqdb::query::{QueryEngine, intersect_sorted};
use kira_seqdb::store::{Store, split_taxa};

const SPECIES: [&str; 5] = [
    "Homo sapiens",
    "Mus musculus",
    "Drosophila melanogaster",
    "Danio rerio",
    "Saccharomyces cerevisiae",
];

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("db")).unwrap();
    (temp, Store::new(root))
}

fn taxon_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(SPECIES.to_vec()), 0..4)
        .prop_map(|names| names.join(";"))
}

fn id_set() -> impl Strategy<Value = BTreeSet<u32>> {
    prop::collection::btree_set(0u32..40, 0..15)
}

fn to_ids(values: &BTreeSet<u32>) -> Vec<RecordId> {
    let mut ids: Vec<RecordId> = values
        .iter()
        .map(|value| value.to_string().parse().unwrap())
        .collect();
    ids.sort();
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_taxon_token_finds_its_record(taxa in prop::collection::vec(taxon_strategy(), 1..6)) {
        let (_temp, store) = temp_store();
        let protocol: Protocol = "gro-seq".parse().unwrap();
        let mut keys = Vec::new();
        for (position, taxon) in taxa.iter().enumerate() {
            let key = RecordKey::new(protocol.clone(), position.to_string().parse().unwrap());
            fs::create_dir_all(store.record_dir(&key).as_std_path()).unwrap();
            store.write_field(&key, Field::Taxon, taxon).unwrap();
            keys.push(key);
        }

        let engine = QueryEngine::build(&store, Selection::all()).unwrap();
        for (key, taxon) in keys.iter().zip(&taxa) {
            for token in split_taxa(taxon) {
                let hits = engine.find_by_species(&token, &BTreeSet::new());
                prop_assert!(hits.iter().any(|hit| &hit.key == key));
            }
        }

        let mentions: usize = taxa.iter().map(|taxon| split_taxa(taxon).len()).sum();
        let counted: usize = engine.list_species().iter().map(|entry| entry.count).sum();
        prop_assert_eq!(counted, mentions);
    }

    #[test]
    fn species_counts_sum_to_mentions_in_series_mode(
        records in prop::collection::vec((taxon_strategy(), any::<bool>()), 0..8)
    ) {
        let (_temp, store) = temp_store();
        let protocol: Protocol = "chip-seq".parse().unwrap();
        let mut series_mentions = 0;
        for (position, (taxon, series)) in records.iter().enumerate() {
            let key = RecordKey::new(protocol.clone(), position.to_string().parse().unwrap());
            fs::create_dir_all(store.record_dir(&key).as_std_path()).unwrap();
            store.write_field(&key, Field::Taxon, taxon).unwrap();
            store
                .write_field(&key, Field::EntryType, if *series { "GSE" } else { "GDS" })
                .unwrap();
            if *series {
                series_mentions += split_taxa(taxon).len();
            }
        }

        let engine = QueryEngine::build(&store, Selection::all().series_only(true)).unwrap();
        let counted: usize = engine.list_species().iter().map(|entry| entry.count).sum();
        prop_assert_eq!(counted, series_mentions);
    }

    #[test]
    fn intersection_matches_nested_loops(left in id_set(), right in id_set()) {
        let left = to_ids(&left);
        let right = to_ids(&right);
        let expected: Vec<RecordId> = left
            .iter()
            .filter(|id| right.iter().any(|other| other == *id))
            .cloned()
            .collect();
        prop_assert_eq!(intersect_sorted(&left, &right), expected);
    }

    #[test]
    fn overlap_matches_nested_loops(left in id_set(), right in id_set()) {
        let (_temp, store) = temp_store();
        for (protocol, ids) in [("A", &left), ("B", &right)] {
            for id in ids {
                let key = RecordKey::new(protocol.parse().unwrap(), id.to_string().parse().unwrap());
                fs::create_dir_all(store.record_dir(&key).as_std_path()).unwrap();
            }
        }
        let protocols: BTreeSet<Protocol> =
            ["A", "B"].iter().map(|name| name.parse().unwrap()).collect();

        let engine = QueryEngine::build(&store, Selection::all()).unwrap();
        let overlaps = engine.protocol_overlap(&protocols);
        prop_assert_eq!(overlaps.len(), 1);
        let found: BTreeSet<u32> = overlaps[0]
            .ids
            .iter()
            .map(|id| id.as_str().parse().unwrap())
            .collect();
        let mut expected = BTreeSet::new();
        for a in &left {
            for b in &right {
                if a == b {
                    expected.insert(*a);
                }
            }
        }
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn contributor_pack_round_trip(
        surname in "[A-Za-z][A-Za-z' -]{0,10}[A-Za-z]",
        year in "[0-9]{1,4}",
    ) {
        let key = ContributorKey::new(surname.clone(), year.clone()).unwrap();
        let unpacked = ContributorKey::unpack(&key.pack()).unwrap();
        prop_assert_eq!(&unpacked.surname, &surname);
        prop_assert_eq!(&unpacked.year, &year);
    }
}
