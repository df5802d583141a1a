use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::path::Path;

use aqi_ingest::{db, stable_hash, Fetcher, Filters, IngestError, Ingestor, InsertCount, Observation, PageSource};
use serde_json::{json, Value};

/// One page with the given records, then nothing.
struct OnePage(Vec<Value>);

impl PageSource for OnePage {
    fn fetch_page(&self, offset: u64, _limit: u32, _filters: &Filters) -> aqi_ingest::Result<Vec<Observation>> {
        if offset > 0 {
            return Ok(Vec::new());
        }
        self.0
            .iter()
            .cloned()
            .map(|v| Observation::from_value(v).map_err(IngestError::from))
            .collect()
    }
}

fn station(name: &str) -> Value {
    json!({
        "id": "1",
        "country": "India",
        "state": "Karnataka",
        "city": "Bengaluru",
        "station": name,
        "last_update": "14-10-2026 08:00:00",
        "latitude": "12.97",
        "longitude": "77.59",
        "pollutant_id": "NO2",
        "pollutant_min": "12",
        "pollutant_max": "48",
        "pollutant_avg": "27"
    })
}

fn hashes_in(path: &Path) -> Vec<String> {
    let conn = db::connect(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT record_hash FROM raw_air_quality_observations ORDER BY id")
        .unwrap();
    let rows = stmt
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap();
    rows
}

fn ingest_once(path: &Path) -> (usize, InsertCount) {
    let source = OnePage(vec![station("Station A"), station("Station B")]);
    let fetcher = Fetcher::new(source, NonZeroU32::new(1000).unwrap());
    let records = fetcher.fetch_all().unwrap();
    let inserted = Ingestor::at(path).insert_raw(&records).unwrap();
    (records.len(), inserted)
}

#[test]
fn rerunning_the_same_ingest_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aqi.sqlite");
    db::init_schema(&db::connect(&path).unwrap()).unwrap();

    let (fetched, inserted) = ingest_once(&path);
    assert_eq!(fetched, 2);
    assert_eq!(inserted, InsertCount::Exact(2));
    let first = hashes_in(&path);
    assert_eq!(first.len(), 2);
    assert_ne!(first[0], first[1]);

    let (fetched, inserted) = ingest_once(&path);
    assert_eq!(fetched, 2);
    assert_eq!(inserted, InsertCount::Exact(0));
    assert_eq!(hashes_in(&path), first);
}

#[test]
fn reordered_replay_is_still_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aqi.sqlite");
    db::init_schema(&db::connect(&path).unwrap()).unwrap();
    let ingestor = Ingestor::at(&path);

    let original = Observation::from_value(station("Station A")).unwrap();
    let mut shuffled = Observation::from_value(json!({
        "pollutant_avg": "27",
        "pollutant_max": "48",
        "pollutant_min": "12",
        "pollutant_id": "NO2",
        "last_update": "14-10-2026 08:00:00",
        "station": "Station A",
        "city": "Bengaluru",
        "state": "Karnataka",
        "country": "India"
    }))
    .unwrap();
    shuffled.extra.insert("source_batch".into(), json!("second-run"));

    assert_eq!(ingestor.insert_raw(&[original.clone()]).unwrap(), InsertCount::Exact(1));
    assert_eq!(ingestor.insert_raw(&[shuffled]).unwrap(), InsertCount::Exact(0));

    let conn = db::connect(&path).unwrap();
    let stored: String = conn
        .query_row("SELECT record FROM raw_air_quality_observations", [], |r| r.get(0))
        .unwrap();
    assert_eq!(stored, original.to_payload().unwrap());
}

#[test]
fn idempotent_ingest_keeps_the_same_hash_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aqi.sqlite");
    db::init_schema(&db::connect(&path).unwrap()).unwrap();
    let ingestor = Ingestor::at(&path);

    let batch: Vec<Observation> = ["Peenya", "Hebbal", "Jayanagar", "Hebbal"]
        .iter()
        .map(|name| Observation::from_value(station(name)).unwrap())
        .collect();
    let expected: BTreeSet<String> = batch.iter().map(|r| stable_hash(r).to_string()).collect();

    assert_eq!(ingestor.insert_raw(&batch).unwrap().rows(), 3);
    let once: BTreeSet<String> = hashes_in(&path).into_iter().collect();
    assert_eq!(ingestor.insert_raw(&batch).unwrap().rows(), 0);
    let twice: BTreeSet<String> = hashes_in(&path).into_iter().collect();

    assert_eq!(once, expected);
    assert_eq!(twice, expected);
    assert_eq!(db::log_stats(&db::connect(&path).unwrap()).unwrap().rows, 3);
}

#[test]
fn records_missing_hashed_fields_are_still_stored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aqi.sqlite");
    db::init_schema(&db::connect(&path).unwrap()).unwrap();

    let partial = vec![
        Observation::from_value(json!({"station": "Only station"})).unwrap(),
        Observation::from_value(json!({"station": "Only station", "note": "extra only"})).unwrap(),
        Observation::from_value(json!({"city": "Chennai"})).unwrap(),
    ];
    let inserted = Ingestor::at(&path).insert_raw(&partial).unwrap();

    // the first two share a dedup key
    assert_eq!(inserted, InsertCount::Exact(2));
}

#[test]
fn stored_payload_keeps_source_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aqi.sqlite");
    db::init_schema(&db::connect(&path).unwrap()).unwrap();

    let record = Observation::from_value(station("Peenya")).unwrap();
    Ingestor::at(&path).insert_raw(&[record]).unwrap();

    let stored: String = db::connect(&path)
        .unwrap()
        .query_row("SELECT record FROM raw_air_quality_observations", [], |r| r.get(0))
        .unwrap();
    assert_eq!(
        stored,
        r#"{"id": "1", "country": "India", "state": "Karnataka", "city": "Bengaluru", "station": "Peenya", "last_update": "14-10-2026 08:00:00", "latitude": "12.97", "longitude": "77.59", "pollutant_id": "NO2", "pollutant_min": "12", "pollutant_max": "48", "pollutant_avg": "27"}"#
    );
}
