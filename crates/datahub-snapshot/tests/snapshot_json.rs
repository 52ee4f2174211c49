//! Integration tests for the snapshot engine and the JSON wire format.

use datahub_core::error::HubError;
use datahub_core::hub::DataHub;
use datahub_core::sample::{Sample, SampleType};
use datahub_snapshot::{
    FilterMask, FormatRequest, Formatter, SnapshotParams, SnapshotStatus, begin,
    begin_with_formatter, snapshot_to,
};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::io::AsyncReadExt;

fn shared(hub: DataHub) -> Rc<RefCell<DataHub>> {
    Rc::new(RefCell::new(hub))
}

async fn take_snapshot(
    hub: &Rc<RefCell<DataHub>>,
    params: &SnapshotParams,
) -> (SnapshotStatus, serde_json::Value) {
    let (sink, mut source) = tokio::io::duplex(256 * 1024);
    let status = snapshot_to(hub, params, sink).await.unwrap();

    let mut raw = Vec::new();
    source.read_to_end(&mut raw).await.unwrap();
    let parsed = serde_json::from_slice(&raw)
        .unwrap_or_else(|e| panic!("bad snapshot output {:?}: {e}", String::from_utf8_lossy(&raw)));
    (status, parsed)
}

#[tokio::test]
async fn test_snapshot_of_live_tree() {
    let hub = shared(DataHub::default());
    {
        let mut h = hub.borrow_mut();
        h.create_input("/a/b", SampleType::Numeric, "").unwrap();
        h.create_input("/a/c", SampleType::Boolean, "").unwrap();
        h.push("/a/b", "", Sample::numeric(5.0, 1.5)).unwrap();
        h.push("/a/c", "", Sample::boolean(6.0, true)).unwrap();
    }

    let (status, out) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    assert_eq!(status, SnapshotStatus::Ok);

    assert!(out["ts"].as_f64().unwrap() > 1.0e9);
    assert_eq!(out["root"], "/");

    let b = &out["upserted"]["a"]["b"];
    assert_eq!(b["type"], 2);
    assert_eq!(b["ts"], 5.0);
    assert_eq!(b["mandatory"], true);
    assert_eq!(b["new"], true);
    assert_eq!(b["value"], 1.5);

    let c = &out["upserted"]["a"]["c"];
    assert_eq!(c["type"], 1);
    assert_eq!(c["value"], true);

    assert!(out.get("deleted").is_none());
}

#[tokio::test]
async fn test_snapshot_clears_new_flags() {
    let hub = shared(DataHub::default());
    hub.borrow_mut()
        .create_input("/a/b", SampleType::Numeric, "")
        .unwrap();

    let (_, first) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    assert_eq!(first["upserted"]["a"]["b"]["new"], true);

    let (_, second) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    assert_eq!(second["upserted"]["a"]["b"]["new"], false);
}

#[tokio::test]
async fn test_since_filters_stale_entries() {
    let hub = shared(DataHub::default());
    hub.borrow_mut()
        .create_input("/a/b", SampleType::Numeric, "")
        .unwrap();

    // First snapshot clears `new`; nothing is then newer than a future
    // `since`, so the second snapshot reports an empty tree.
    take_snapshot(&hub, &SnapshotParams::new("/")).await;

    let mut params = SnapshotParams::new("/");
    params.since = datahub_core::sample::wall_clock() + 100.0;
    let (status, out) = take_snapshot(&hub, &params).await;
    assert_eq!(status, SnapshotStatus::Ok);
    assert_eq!(out["upserted"], serde_json::json!({}));
}

#[tokio::test]
async fn test_snapshot_of_subtree() {
    let hub = shared(DataHub::default());
    {
        let mut h = hub.borrow_mut();
        h.create_input("/a/b", SampleType::Numeric, "").unwrap();
        h.create_input("/other/x", SampleType::Numeric, "").unwrap();
        h.push("/a/b", "", Sample::numeric(1.0, 2.0)).unwrap();
    }

    let (_, out) = take_snapshot(&hub, &SnapshotParams::new("/a")).await;
    assert_eq!(out["root"], "/a");
    assert_eq!(out["upserted"]["b"]["value"], 2.0);
    assert!(out["upserted"].get("other").is_none());
}

#[tokio::test]
async fn test_trigger_leaves_have_no_value_field() {
    let hub = shared(DataHub::default());
    {
        let mut h = hub.borrow_mut();
        h.create_input("/t", SampleType::Trigger, "").unwrap();
        h.push("/t", "", Sample::trigger(3.0)).unwrap();
    }

    let (_, out) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    let t = &out["upserted"]["t"];
    assert_eq!(t["type"], 0);
    assert_eq!(t["ts"], 3.0);
    assert!(t.get("value").is_none());
}

#[tokio::test]
async fn test_json_values_inserted_verbatim() {
    let hub = shared(DataHub::default());
    {
        let mut h = hub.borrow_mut();
        h.create_input("/j", SampleType::Json, "").unwrap();
        h.push("/j", "", Sample::json(1.0, r#"{"k":[1,2],"s":"x"}"#))
            .unwrap();
    }

    let (_, out) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    assert_eq!(
        out["upserted"]["j"]["value"],
        serde_json::json!({"k":[1,2],"s":"x"})
    );
}

#[tokio::test]
async fn test_deletion_tracking_lifecycle() {
    let hub = shared(DataHub::default());
    {
        let mut h = hub.borrow_mut();
        h.set_deletion_tracking(true);
        h.create_input("/app/z", SampleType::Numeric, "").unwrap();
        h.push("/app/z", "", Sample::numeric(1.0, 9.0)).unwrap();
        h.delete_resource("/app/z").unwrap();
    }

    // Deleted entries are reported under "deleted" and retained.
    let (_, first) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    assert_eq!(first["deleted"]["app"]["z"]["type"], 2);
    assert!(first["upserted"]["app"].get("z").is_none());

    // Still reported by the next snapshot.
    let (_, second) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    assert_eq!(second["deleted"]["app"]["z"]["type"], 2);

    // A flushing snapshot reports them one last time, then releases them.
    let mut flushing = SnapshotParams::new("/");
    flushing.flush_deletions = true;
    let (status, third) = take_snapshot(&hub, &flushing).await;
    assert_eq!(status, SnapshotStatus::Ok);
    assert_eq!(third["deleted"]["app"]["z"]["type"], 2);

    let (_, fourth) = take_snapshot(&hub, &SnapshotParams::new("/")).await;
    assert!(fourth.get("deleted").is_none());
    assert!(hub.borrow().tree().find("/app/z").is_none());
}

#[tokio::test]
async fn test_structural_mutations_do_not_alter_visited_set() {
    let hub = shared(DataHub::default());
    hub.borrow_mut()
        .create_input("/a/b", SampleType::Numeric, "")
        .unwrap();

    let prepared = begin(&hub, &SnapshotParams::new("/")).unwrap();
    {
        let mut h = hub.borrow_mut();
        // Born after the freeze: invisible to this snapshot.
        h.create_input("/a/c", SampleType::Numeric, "").unwrap();
        // Deferred until the snapshot ends.
        h.delete_resource("/a/b").unwrap();
        // Value pushes keep flowing and ARE reflected.
        h.push("/a/b", "", Sample::numeric(99.0, 123.0)).unwrap();
    }

    let (sink, mut source) = tokio::io::duplex(256 * 1024);
    let status = prepared.stream(sink).await;
    assert_eq!(status, SnapshotStatus::Ok);

    let mut raw = Vec::new();
    source.read_to_end(&mut raw).await.unwrap();
    let out: serde_json::Value = serde_json::from_slice(&raw).unwrap();

    assert_eq!(out["upserted"]["a"]["b"]["value"], 123.0);
    assert!(out["upserted"]["a"].get("c").is_none());

    // After completion the deferred delete has been applied.
    assert!(hub.borrow().inspect("/a/b").is_none());
    assert!(hub.borrow().inspect("/a/c").is_some());
}

#[tokio::test]
async fn test_busy_while_snapshot_claimed() {
    let hub = shared(DataHub::default());
    hub.borrow_mut()
        .create_input("/a", SampleType::Numeric, "")
        .unwrap();

    let prepared = begin(&hub, &SnapshotParams::new("/")).unwrap();
    let (sink, _source) = tokio::io::duplex(4096);
    assert!(matches!(
        snapshot_to(&hub, &SnapshotParams::new("/"), sink).await,
        Err(HubError::Busy)
    ));

    // Releasing the claim makes the hub available again.
    prepared.abort();
    let (sink, _source) = tokio::io::duplex(256 * 1024);
    assert!(snapshot_to(&hub, &SnapshotParams::new("/"), sink).await.is_ok());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let hub = shared(DataHub::default());
    let (sink, _source) = tokio::io::duplex(4096);
    assert!(matches!(
        snapshot_to(&hub, &SnapshotParams::new("/missing"), sink).await,
        Err(HubError::NotFound(_))
    ));
    assert!(!hub.borrow().snapshot_active(), "failed begin leaves no claim");
}

#[tokio::test]
async fn test_reader_hangup_ends_with_closed() {
    let hub = shared(DataHub::default());
    hub.borrow_mut()
        .create_input("/a/b", SampleType::Numeric, "")
        .unwrap();

    let (sink, source) = tokio::io::duplex(64);
    drop(source);
    let status = snapshot_to(&hub, &SnapshotParams::new("/"), sink)
        .await
        .unwrap();
    assert_eq!(status, SnapshotStatus::Closed);
    assert!(!hub.borrow().snapshot_active(), "slot released after failure");
}

/// A formatter that never stops asking for passes.
struct GreedyFormatter {
    starts: Rc<RefCell<usize>>,
}

impl Formatter for GreedyFormatter {
    fn start_tree(
        &mut self,
        _out: &mut Vec<u8>,
        _tree: &datahub_core::tree::Tree,
        _root: datahub_core::tree::EntryId,
    ) {
        *self.starts.borrow_mut() += 1;
    }
    fn begin_node(
        &mut self,
        _out: &mut Vec<u8>,
        _tree: &datahub_core::tree::Tree,
        _root: datahub_core::tree::EntryId,
        _id: datahub_core::tree::EntryId,
    ) {
    }
    fn end_node(
        &mut self,
        _out: &mut Vec<u8>,
        _tree: &datahub_core::tree::Tree,
        _root: datahub_core::tree::EntryId,
        _id: datahub_core::tree::EntryId,
    ) {
    }
    fn end_tree(
        &mut self,
        _out: &mut Vec<u8>,
        _tree: &datahub_core::tree::Tree,
        _root: datahub_core::tree::EntryId,
    ) {
    }
    fn close(&mut self) {}
    fn request(&self) -> FormatRequest {
        FormatRequest {
            scan: true,
            filter: FilterMask::LIVE,
        }
    }
}

#[tokio::test]
async fn test_pass_limit_enforced() {
    let hub = shared(DataHub::default());
    hub.borrow_mut()
        .create_input("/a", SampleType::Numeric, "")
        .unwrap();

    let starts = Rc::new(RefCell::new(0usize));
    let formatter = Box::new(GreedyFormatter {
        starts: starts.clone(),
    });
    let prepared = begin_with_formatter(&hub, &SnapshotParams::new("/"), formatter).unwrap();

    let (sink, _source) = tokio::io::duplex(256 * 1024);
    let status = prepared.stream(sink).await;
    assert_eq!(status, SnapshotStatus::OutOfRange);
    assert_eq!(*starts.borrow(), 10, "exactly MAX_PASSES passes ran");
    assert!(!hub.borrow().snapshot_active());
}

#[test]
fn test_unsupported_format_name() {
    use datahub_snapshot::SnapshotFormat;
    assert!(matches!(
        SnapshotFormat::from_name("cbor"),
        Err(HubError::Unsupported(_))
    ));
    assert_eq!(
        SnapshotFormat::from_name("json").unwrap(),
        SnapshotFormat::Json
    );
}
