//! Two-device integration tests against a shared in-memory remote.

use bytes::Bytes;
use coffer_core::{EntityId, EntityKind, EntityPath, SyncEvent, SyncState, Version};
use coffer_remote::{MemoryRemote, RemoteClient, RemoteResult, RemoteStat, VersionMeta};
use coffer_store::{
    AesGcmCryptor, EncryptedObjectStore, EncryptionKey, MemoryObjectStore, ObjectStore,
    OnDiskState,
};
use coffer_sync_engine::{
    AdoptOptions, EngineConfig, FolderItemOptions, SyncEngine, SyncError, UploadOptions,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn device(id: u8, remote: &Arc<MemoryRemote>) -> SyncEngine {
    SyncEngine::new(
        EngineConfig::new([id; 16]).with_chunk_size(8),
        Arc::new(MemoryObjectStore::new()),
        Arc::clone(remote) as Arc<dyn RemoteClient>,
    )
}

fn pair() -> (SyncEngine, SyncEngine, Arc<MemoryRemote>) {
    init_tracing();
    let remote = Arc::new(MemoryRemote::new());
    (device(1, &remote), device(2, &remote), remote)
}

/// Lets device `to` learn of an entity device `from` has published.
fn share(from: &SyncEngine, to: &SyncEngine, path: &EntityPath, kind: EntityKind, version: Version) {
    let entity = from.entity_id(path).expect("entity must exist on the sharing device");
    to.observe_remote_change(path, entity, kind, version).unwrap();
}

#[test]
fn round_trip_preserves_bytes_and_versions() {
    let (a, b, _) = pair();
    let path = EntityPath::new("/vault/report.txt");
    let content = b"quarterly numbers, encrypted at rest".as_slice();

    a.write_file(&path, content).unwrap();
    let uploaded = a.upload(&path, UploadOptions::default()).unwrap().unwrap();
    assert_eq!(uploaded, Version(1));

    share(&a, &b, &path, EntityKind::File, uploaded);
    assert_eq!(b.status(&path, true).unwrap().state, SyncState::Behind);

    b.adopt_remote(&path, AdoptOptions::default()).unwrap();

    let status = b.status(&path, false).unwrap();
    assert_eq!(status.state, SyncState::Synced);
    assert_eq!(status.local.latest, Some(Version(1)));
    assert_eq!(status.synced.latest, Some(Version(1)));
    assert_eq!(b.read_file(&path, None).unwrap(), content);
}

#[test]
fn upload_is_idempotent_without_new_writes() {
    let (a, _, remote) = pair();
    let path = EntityPath::new("/idem.txt");

    a.write_file(&path, b"once").unwrap();
    assert_eq!(a.upload(&path, UploadOptions::default()).unwrap(), Some(Version(1)));
    assert_eq!(remote.committed_count(), 1);

    // Second call performs no transfer and returns nothing.
    assert_eq!(a.upload(&path, UploadOptions::default()).unwrap(), None);
    assert_eq!(remote.committed_count(), 1);
}

#[test]
fn stale_expected_local_version_is_rejected() {
    let (a, _, _) = pair();
    let path = EntityPath::new("/stale.txt");
    a.write_file(&path, b"v1").unwrap();
    a.write_file(&path, b"v2").unwrap();

    let err = a
        .upload(&path, UploadOptions { local_version: Some(Version(1)), upload_version: None })
        .unwrap_err();
    assert!(matches!(err, SyncError::VersionMismatch { .. }));

    // Correcting the parameter recovers.
    assert!(err.is_recoverable());
    a.upload(&path, UploadOptions { local_version: Some(Version(2)), upload_version: None })
        .unwrap();
}

#[test]
fn scenario_a_edit_probe_adopt() {
    let (a, b, _) = pair();
    let path = EntityPath::new("/shared.md");

    // Both devices synced at version 1.
    a.write_file(&path, b"draft").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();

    // Device A writes; its status is unsynced with local=2, synced=1.
    a.write_file(&path, b"draft, revised").unwrap();
    let status = a.status(&path, false).unwrap();
    assert_eq!(status.state, SyncState::Unsynced);
    assert_eq!(status.local.latest, Some(Version(2)));
    assert_eq!(status.synced.latest, Some(Version(1)));

    a.upload(&path, UploadOptions::default()).unwrap();

    // Device B probes and sees behind with remote=2, then adopts.
    let status = b.status(&path, true).unwrap();
    assert_eq!(status.state, SyncState::Behind);
    assert_eq!(status.remote.latest, Some(Version(2)));

    b.adopt_remote(&path, AdoptOptions::default()).unwrap();
    let status = b.status(&path, false).unwrap();
    assert_eq!(status.local.latest, Some(Version(2)));
    assert_eq!(status.synced.latest, Some(Version(2)));
    assert_eq!(b.read_file(&path, None).unwrap(), b"draft, revised");
}

#[test]
fn scenario_b_conflict_requires_explicit_upload_version() {
    let (a, b, _) = pair();
    let path = EntityPath::new("/conflict.md");

    // Common version 1 on both devices.
    a.write_file(&path, b"base").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();

    // A advances to 2 and uploads; B independently writes its own 2.
    a.write_file(&path, b"from A").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    b.write_file(&path, b"from B").unwrap();

    assert_eq!(b.status(&path, true).unwrap().state, SyncState::Conflicting);

    // A plain upload must not silently clobber the concurrent remote edit.
    let err = b.upload(&path, UploadOptions::default()).unwrap_err();
    assert!(matches!(err, SyncError::VersionMismatch { .. }));

    // Naming a version past the remote's publishes B's content as 3.
    let uploaded = b
        .upload(&path, UploadOptions { local_version: None, upload_version: Some(Version(3)) })
        .unwrap();
    assert_eq!(uploaded, Some(Version(3)));
    let status = b.status(&path, false).unwrap();
    assert_eq!(status.state, SyncState::Synced);
    assert_eq!(status.synced.latest, Some(Version(3)));

    // A must later adopt explicitly.
    let status = a.status(&path, true).unwrap();
    assert_eq!(status.state, SyncState::Behind);
    a.adopt_remote(&path, AdoptOptions::default()).unwrap();
    assert_eq!(a.read_file(&path, None).unwrap(), b"from B");
}

#[test]
fn divergent_replicas_observe_conflict_after_probing() {
    let (a, b, _) = pair();
    let path = EntityPath::new("/both-edit.md");

    a.write_file(&path, b"common").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();

    // Both advance past the common version before seeing each other's push.
    a.write_file(&path, b"a's take").unwrap();
    b.write_file(&path, b"b's take").unwrap();

    // A pushes first; B's probe must report the conflict.
    a.upload(&path, UploadOptions::default()).unwrap();
    assert_eq!(b.status(&path, true).unwrap().state, SyncState::Conflicting);

    // B resolves by publishing past the remote; now A's probe reports the
    // mirror-image divergence once it writes again before adopting.
    b.upload(&path, UploadOptions { local_version: None, upload_version: Some(Version(3)) })
        .unwrap();
    a.write_file(&path, b"a again").unwrap();
    assert_eq!(a.status(&path, true).unwrap().state, SyncState::Conflicting);
}

#[test]
fn scenario_c_archival_requires_synced_state() {
    let (a, _, _) = pair();
    let path = EntityPath::new("/archive-me.txt");

    a.write_file(&path, b"v1").unwrap();
    let err = a.archive_current(&path, None).unwrap_err();
    assert!(matches!(err, SyncError::NotSynced { .. }));

    a.upload(&path, UploadOptions::default()).unwrap();
    let archived = a.archive_current(&path, None).unwrap();
    assert_eq!(archived, Version(1));

    a.write_file(&path, b"v2").unwrap();
    let versions = a.list_versions(&path).unwrap();
    assert_eq!(versions.current, Some(Version(2)));
    assert_eq!(versions.archived, vec![Version(1)]);

    // Archived versions stay readable by number.
    assert_eq!(a.read_file(&path, Some(Version(1))).unwrap(), b"v1");
}

/// A remote whose pushes block while the test holds the gate, pinning an
/// upload in flight deterministically.
struct GatedRemote {
    inner: Arc<MemoryRemote>,
    gate: Mutex<()>,
}

impl GatedRemote {
    fn new(inner: Arc<MemoryRemote>) -> Self {
        Self { inner, gate: Mutex::new(()) }
    }
}

impl RemoteClient for GatedRemote {
    fn probe_latest(&self, entity: &EntityId) -> RemoteResult<Option<Version>> {
        self.inner.probe_latest(entity)
    }
    fn stat(&self, entity: &EntityId, version: Version) -> RemoteResult<RemoteStat> {
        self.inner.stat(entity, version)
    }
    fn fetch_chunk(
        &self,
        entity: &EntityId,
        version: Version,
        offset: u64,
        len: u64,
    ) -> RemoteResult<Bytes> {
        self.inner.fetch_chunk(entity, version, offset, len)
    }
    fn begin_version(
        &self,
        entity: &EntityId,
        version: Version,
        meta: &VersionMeta,
    ) -> RemoteResult<()> {
        self.inner.begin_version(entity, version, meta)
    }
    fn push_chunk(
        &self,
        entity: &EntityId,
        version: Version,
        offset: u64,
        bytes: Bytes,
    ) -> RemoteResult<()> {
        let _gate = self.gate.lock();
        self.inner.push_chunk(entity, version, offset, bytes)
    }
    fn commit_version(&self, entity: &EntityId, version: Version) -> RemoteResult<()> {
        self.inner.commit_version(entity, version)
    }
}

#[test]
fn concurrent_upload_joins_the_inflight_task() {
    init_tracing();
    let inner = Arc::new(MemoryRemote::new());
    let gated = Arc::new(GatedRemote::new(Arc::clone(&inner)));
    let engine = SyncEngine::new(
        EngineConfig::new([3u8; 16]).with_chunk_size(4),
        Arc::new(MemoryObjectStore::new()),
        Arc::clone(&gated) as Arc<dyn RemoteClient>,
    );
    let path = EntityPath::new("/big.bin");
    engine.write_file(&path, &[0xAB; 64]).unwrap();

    let rx = engine.subscribe(&path);

    // Pin the transfer, then start it.
    let hold = gated.gate.lock();
    let first = engine.start_upload(&path, UploadOptions::default()).unwrap().unwrap();

    // While in flight: the second call joins, and status reports progress.
    let second = engine.start_upload(&path, UploadOptions::default()).unwrap().unwrap();
    assert_eq!(first.task_id, second.task_id);
    assert_eq!(first.upload_version, second.upload_version);

    let status = engine.status(&path, false).unwrap();
    let uploading = status.uploading.expect("upload task must be visible");
    assert_eq!(uploading.task_id, first.task_id);
    assert_eq!(uploading.version, Version(1));

    drop(hold);

    // Completion is observed via upload-done.
    let done = wait_for(&rx, |e| matches!(e, SyncEvent::UploadDone { .. }));
    assert!(matches!(
        done,
        SyncEvent::UploadDone { version: Version(1), .. }
    ));
    assert_eq!(inner.committed_count(), 1);

    // The task is gone from status afterwards.
    wait_until(|| engine.status(&path, false).unwrap().uploading.is_none());
}

fn wait_for(
    rx: &std::sync::mpsc::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline
            .checked_duration_since(std::time::Instant::now())
            .expect("timed out waiting for event");
        let event = rx.recv_timeout(remaining).expect("event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

fn wait_until(pred: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(std::time::Instant::now() < deadline, "condition never held");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn scenario_d_write_and_upload_race_never_tears() {
    let (a, _, remote) = pair();
    let path = EntityPath::new("/race.bin");

    let v1_content = vec![0x11u8; 256];
    let v2_content = vec![0x22u8; 256];
    a.write_file(&path, &v1_content).unwrap();

    // The upload is queued first, so it captures version 1 even though a
    // write lands immediately afterwards.
    let started = a.start_upload(&path, UploadOptions::default()).unwrap().unwrap();
    a.write_file(&path, &v2_content).unwrap();

    wait_until(|| a.status(&path, false).unwrap().synced.latest == Some(started.upload_version));

    // Committed version is never earlier than the version current when the
    // upload was queued, and the bytes reflect exactly one write.
    assert!(started.upload_version >= Version(1));
    let entity = a.entity_id(&path).unwrap();
    let stat = remote.stat(&entity, started.upload_version).unwrap();
    let bytes = remote
        .fetch_chunk(&entity, started.upload_version, 0, stat.total_len)
        .unwrap();
    assert!(bytes[..] == v1_content[..] || bytes[..] == v2_content[..]);

    // The racing write is still pending publication.
    assert_eq!(a.status(&path, false).unwrap().state, SyncState::Unsynced);
}

#[test]
fn download_resumes_after_interruption() {
    let (a, b, remote) = pair();
    let path = EntityPath::new("/resume.bin");
    let content: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();

    a.write_file(&path, &content).unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));

    // Fail partway through the first attempt.
    remote.inject_fetch_failures(10);
    let err = b.download(&path, Version(1)).unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(
        b.is_remote_version_on_disk(&path, Version(1)).unwrap(),
        OnDiskState::Partial
    );

    // The retry picks up the persisted chunks and completes.
    b.download(&path, Version(1)).unwrap();
    assert_eq!(
        b.is_remote_version_on_disk(&path, Version(1)).unwrap(),
        OnDiskState::Complete
    );
    assert_eq!(b.read_remote_version(&path, Version(1)).unwrap(), content);

    // Already-complete downloads start no task.
    assert_eq!(b.start_download(&path, Version(1)).unwrap(), None);
}

#[test]
fn implicit_range_read_fetches_only_needed_chunks() {
    let (a, b, _) = pair();
    let path = EntityPath::new("/ranged.bin");
    let content: Vec<u8> = (0..100u8).collect();

    a.write_file(&path, &content).unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));

    // Reading a slice fetches the covering chunks without a download call.
    let slice = b.read_remote_bytes(&path, Version(1), 10, 20).unwrap();
    assert_eq!(slice, content[10..30]);
    assert_eq!(
        b.is_remote_version_on_disk(&path, Version(1)).unwrap(),
        OnDiskState::Partial
    );
}

#[test]
fn delta_upload_reconstructs_identically() {
    let (a, b, remote) = pair();
    let path = EntityPath::new("/delta.bin");

    let v1: Vec<u8> = vec![0x55; 4096];
    let mut v2 = v1.clone();
    v2[2048] = 0xAA;

    a.write_file(&path, &v1).unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();

    a.write_file(&path, &v2).unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();

    // The second version went over the wire as a patch.
    let entity = a.entity_id(&path).unwrap();
    let stat = remote.stat(&entity, Version(2)).unwrap();
    assert_eq!(stat.delta_base, Some(Version(1)));
    assert!(stat.total_len < v2.len() as u64);

    // The adopting replica reconstructs the full bytes.
    b.status(&path, true).unwrap();
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();
    assert_eq!(b.read_file(&path, None).unwrap(), v2);
}

#[test]
fn offline_calls_fail_and_leave_ledger_unchanged() {
    let (a, _, _) = pair();
    let path = EntityPath::new("/offline.txt");
    a.write_file(&path, b"data").unwrap();

    a.set_online(false);

    let err = a.status(&path, true).unwrap_err();
    assert!(err.is_connectivity());
    let err = a.upload(&path, UploadOptions::default()).unwrap_err();
    assert!(err.is_connectivity());

    // Local reads/writes are unaffected; the ledger did not move.
    let status = a.status(&path, false).unwrap();
    assert_eq!(status.local.latest, Some(Version(1)));
    assert_eq!(status.synced.latest, None);
    a.write_file(&path, b"still writable").unwrap();

    a.set_online(true);
    a.upload(&path, UploadOptions::default()).unwrap();
    assert_eq!(a.status(&path, false).unwrap().state, SyncState::Synced);
}

#[test]
fn folder_upload_requires_published_children() {
    let (a, _, _) = pair();
    let folder = EntityPath::new("/docs");
    let child = folder.child("draft.txt");

    a.create_folder(&folder).unwrap();
    a.write_file(&child, b"body").unwrap();

    let err = a.upload(&folder, UploadOptions::default()).unwrap_err();
    assert!(matches!(err, SyncError::ChildNeverUploaded { ref child } if child == "draft.txt"));

    a.upload(&child, UploadOptions::default()).unwrap();
    a.upload(&folder, UploadOptions::default()).unwrap();
}

#[test]
fn exists_in_synced_parent_reflects_published_listing() {
    let (a, _, _) = pair();
    let folder = EntityPath::new("/docs");
    let listed = folder.child("listed.txt");
    let unlisted = folder.child("new.txt");

    a.create_folder(&folder).unwrap();
    a.write_file(&listed, b"x").unwrap();
    a.upload(&listed, UploadOptions::default()).unwrap();
    a.upload(&folder, UploadOptions::default()).unwrap();

    assert_eq!(
        a.status(&listed, false).unwrap().exists_in_synced_parent,
        Some(true)
    );

    // Created after the folder was published: not yet in the synced
    // listing.
    a.write_file(&unlisted, b"y").unwrap();
    assert_eq!(
        a.status(&unlisted, false).unwrap().exists_in_synced_parent,
        Some(false)
    );
}

#[test]
fn file_diff_reports_sizes_and_content_equality() {
    let (a, b, _) = pair();
    let path = EntityPath::new("/diffed.txt");

    a.write_file(&path, b"shared base").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();

    // Synced: nothing to show.
    assert!(b
        .diff_current_and_remote_versions(&path, None, false)
        .unwrap()
        .is_none());

    a.write_file(&path, b"remote side grew longer").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    b.write_file(&path, b"local side").unwrap();
    b.status(&path, true).unwrap();

    // Force the byte comparison so the verdict never rides on mtime
    // granularity.
    let diff = b
        .diff_current_and_remote_versions(&path, None, true)
        .unwrap()
        .expect("diverged versions must produce a diff");
    assert_eq!(diff.local_version, Version(2));
    assert_eq!(diff.remote_version, Version(2));
    assert_eq!(diff.common_version, Some(Version(1)));
    assert!(!diff.contents_same);
    assert_eq!(diff.local_len, b"local side".len() as u64);
    assert_eq!(diff.remote_len, b"remote side grew longer".len() as u64);
}

#[test]
fn folder_diff_surfaces_name_overlaps_for_per_item_adoption() {
    let (a, b, _) = pair();
    let folder = EntityPath::new("/docs");
    let report = folder.child("report.txt");

    // A publishes a folder containing report.txt.
    a.create_folder(&folder).unwrap();
    a.write_file(&report, b"A's report").unwrap();
    a.upload(&report, UploadOptions::default()).unwrap();
    a.upload(&folder, UploadOptions::default()).unwrap();

    // B adopts the folder, then creates its own report.txt under the same
    // name with a different identity.
    let folder_version = a.status(&folder, false).unwrap().synced.latest.unwrap();
    share(&a, &b, &folder, EntityKind::Folder, folder_version);
    b.adopt_remote(&folder, AdoptOptions::default()).unwrap();
    b.write_file(&report, b"B's report").unwrap();

    // A publishes another folder version with an extra child.
    let other = folder.child("other.txt");
    a.write_file(&other, b"A only").unwrap();
    a.upload(&other, UploadOptions::default()).unwrap();
    a.upload(&folder, UploadOptions::default()).unwrap();

    assert_eq!(b.status(&folder, true).unwrap().state, SyncState::Conflicting);

    let diff = b
        .diff_current_and_remote_folder_versions(&folder, None)
        .unwrap()
        .expect("diverged folders must produce a diff");
    assert_eq!(diff.in_remote, vec!["other.txt".to_string()]);
    assert!(diff.in_current.is_empty());
    assert_eq!(diff.name_overlaps.len(), 1);
    assert_eq!(diff.name_overlaps[0].name, "report.txt");

    // Cherry-pick the remote child without whole-folder adoption.
    let err = b
        .adopt_remote_folder_item(&folder, "report.txt", FolderItemOptions::default())
        .unwrap_err();
    assert!(matches!(err, SyncError::Conflict { .. }));

    let new_version = b
        .adopt_remote_folder_item(
            &folder,
            "report.txt",
            FolderItemOptions { replace_local_item: true, ..Default::default() },
        )
        .unwrap();
    assert_eq!(b.read_file(&report, None).unwrap(), b"A's report");
    assert_eq!(
        b.entity_id(&report),
        a.entity_id(&report),
        "the imported child keeps the remote identity"
    );
    assert_eq!(b.status(&folder, false).unwrap().local.latest, Some(new_version));
}

#[test]
fn conflicting_adopt_requires_named_version() {
    let (a, b, _) = pair();
    let path = EntityPath::new("/pick-me.txt");

    a.write_file(&path, b"base").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();

    a.write_file(&path, b"A's v2").unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();
    b.write_file(&path, b"B's v2").unwrap();
    b.status(&path, true).unwrap();

    let err = b.adopt_remote(&path, AdoptOptions::default()).unwrap_err();
    assert!(matches!(err, SyncError::Conflict { .. }));

    // Naming the remote version discards the local edits.
    b.adopt_remote(&path, AdoptOptions { remote_version: Some(Version(2)) })
        .unwrap();
    assert_eq!(b.read_file(&path, None).unwrap(), b"A's v2");
    assert_eq!(b.status(&path, false).unwrap().state, SyncState::Synced);
}

#[test]
fn status_is_stable_without_mutation() {
    let (a, _, _) = pair();
    let path = EntityPath::new("/pure.txt");
    a.write_file(&path, b"v1").unwrap();

    let first = a.status(&path, false).unwrap();
    let second = a.status(&path, false).unwrap();
    assert_eq!(first, second);
}

#[test]
fn transfer_events_flow_through_recursive_subscription() {
    let (a, b, _) = pair();
    let root = EntityPath::root();
    let path = EntityPath::new("/events/file.bin");

    let a_rx = a.subscribe_recursive(&root, 4);
    a.write_file(&path, &[7u8; 40]).unwrap();
    a.upload(&path, UploadOptions::default()).unwrap();

    let events: Vec<SyncEvent> = a_rx.try_iter().collect();
    assert!(events.iter().any(|e| matches!(e, SyncEvent::FileChange { .. })));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::UploadStarted { .. })));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::UploadDone { .. })));

    let b_rx = b.subscribe_recursive(&root, 4);
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.download(&path, Version(1)).unwrap();

    let events: Vec<SyncEvent> = b_rx.try_iter().collect();
    assert!(events.iter().any(|e| matches!(e, SyncEvent::RemoteChange { .. })));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::DownloadStarted { .. })));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::DownloadProgress { .. })));
    assert!(events.iter().any(|e| matches!(e, SyncEvent::DownloadDone { .. })));
}

#[test]
fn engine_runs_over_an_encrypted_store() {
    init_tracing();
    let remote = Arc::new(MemoryRemote::new());

    let encrypted_engine = |key: &EncryptionKey| {
        let inner: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let objects = EncryptedObjectStore::new(inner, Arc::new(AesGcmCryptor::new(key)));
        SyncEngine::new(
            EngineConfig::new([9u8; 16]).with_chunk_size(8),
            Arc::new(objects),
            Arc::clone(&remote) as Arc<dyn RemoteClient>,
        )
    };

    // Both devices hold the same account key; chunks at rest are sealed.
    let key = EncryptionKey::generate();
    let a = encrypted_engine(&key);
    let b = encrypted_engine(&key);

    let path = EntityPath::new("/sealed.txt");
    let content = b"only ciphertext ever touches the disk".as_slice();
    a.write_file(&path, content).unwrap();
    assert_eq!(a.read_file(&path, None).unwrap(), content);

    a.upload(&path, UploadOptions::default()).unwrap();
    share(&a, &b, &path, EntityKind::File, Version(1));
    b.adopt_remote(&path, AdoptOptions::default()).unwrap();
    assert_eq!(b.read_file(&path, None).unwrap(), content);
}

#[test]
fn suspended_transfer_resumes_after_reconnect() {
    let (a, _, _) = pair();
    let path = EntityPath::new("/suspend.bin");
    a.write_file(&path, &[9u8; 512]).unwrap();

    let rx = a.subscribe(&path);
    let started = a.start_upload(&path, UploadOptions::default()).unwrap().unwrap();

    // Losing the network parks the in-flight transfer; regaining it lets
    // the transfer finish without any caller-side retry.
    a.set_online(false);
    a.set_online(true);

    let done = wait_for(&rx, |e| matches!(e, SyncEvent::UploadDone { .. }));
    match done {
        SyncEvent::UploadDone { version, task_id, .. } => {
            assert_eq!(version, started.upload_version);
            assert_eq!(task_id, started.task_id);
        }
        _ => unreachable!(),
    }
}
