use condor_core::{ChannelService, CoreError, InlineQueue, UploadTarget};
use condor_remote::{RemoteError, RemoteResponse, Session};
use condor_schema::{ChannelSpec, MirrorMode};
use condor_store::{ContentStore, FileIndex, FileStore, PackageIndex, StoreError, StoreLayout};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeUpstream {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    offline: bool,
}

impl FakeUpstream {
    fn serve(&self, url: &str, body: &[u8]) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_owned(), body.to_vec());
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Session for FakeUpstream {
    fn get(&self, url: &str) -> Result<RemoteResponse, RemoteError> {
        self.calls.lock().unwrap().push(url.to_owned());
        if self.offline {
            return Err(RemoteError::Unavailable {
                url: url.to_owned(),
                reason: "connection refused".to_owned(),
            });
        }
        Ok(match self.responses.lock().unwrap().get(url) {
            Some(body) => RemoteResponse::from_bytes(200, body.clone()),
            None => RemoteResponse::empty(404),
        })
    }
}

fn archive(name: &str, version: &str, subdir: &str) -> Vec<u8> {
    let index = format!(
        r#"{{"name":"{name}","version":"{version}","build":"0","build_number":0,"subdir":"{subdir}"}}"#
    );
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(index.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "info/index.json", index.as_bytes())
        .unwrap();
    let tar = builder.into_inner().unwrap();
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
    enc.write_all(&tar).unwrap();
    enc.finish().unwrap()
}

fn setup(upstream: FakeUpstream) -> (tempfile::TempDir, ChannelService, Arc<FakeUpstream>) {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();
    let upstream = Arc::new(upstream);
    let service = ChannelService::new(
        Arc::new(FileIndex::new(layout.clone())),
        Arc::new(FileStore::new(layout)),
        Arc::new(InlineQueue),
        upstream.clone(),
    );
    (dir, service, upstream)
}

fn spec(name: &str, url: Option<&str>, mode: Option<MirrorMode>) -> ChannelSpec {
    let mut spec = ChannelSpec::local(name);
    spec.mirror_channel_url = url.map(str::to_owned);
    spec.mirror_mode = mode;
    spec
}

fn read_all(mut file: condor_store::StoredFile) -> Vec<u8> {
    let mut buf = Vec::new();
    file.reader.read_to_end(&mut buf).unwrap();
    buf
}

#[test]
fn url_without_scheme_rejected_before_network() {
    let (_dir, service, upstream) = setup(FakeUpstream::default());
    let err = service
        .create_channel(&spec("m", Some("no-schema-host"), Some(MirrorMode::Mirror)), None)
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfig(_)));
    assert!(err.to_string().contains("schema (http/https) missing"));
    assert!(!service.index().channel_exists("m").unwrap());
    assert_eq!(upstream.total_calls(), 0);
}

#[test]
fn unreachable_mirror_is_not_created() {
    let (_dir, service, _upstream) = setup(FakeUpstream {
        offline: true,
        ..FakeUpstream::default()
    });
    let err = service
        .create_channel(
            &spec("m", Some("http://fantasy_host"), Some(MirrorMode::Mirror)),
            None,
        )
        .unwrap_err();
    assert!(err.is_unavailable());
    let msg = err.to_string();
    assert!(msg.contains("unavailable"));
    assert!(msg.contains("http://fantasy_host"));
    assert!(!service.index().channel_exists("m").unwrap());
}

#[test]
fn mirror_creation_fetches_channeldata_once_then_syncs() {
    let (_dir, service, upstream) = setup(FakeUpstream::default());
    upstream.serve("http://up/channeldata.json", br#"{"subdirs": ["noarch"]}"#);
    upstream.serve(
        "http://up/noarch/repodata.json",
        br#"{"packages": {"demo-1.0-0.tar.bz2": {"time_modified": 42}}}"#,
    );
    upstream.serve("http://up/noarch/demo-1.0-0.tar.bz2", &archive("demo", "1.0", "noarch"));

    let (record, report) = service
        .create_channel(&spec("m", Some("http://up"), Some(MirrorMode::Mirror)), Some("alice"))
        .unwrap();

    assert_eq!(record.mode(), MirrorMode::Mirror);
    assert_eq!(record.timestamp_mirror_sync, 42);
    assert_eq!(record.owner.as_deref(), Some("alice"));
    assert_eq!(report.unwrap().queued, 1);
    assert_eq!(upstream.calls_to("http://up/channeldata.json"), 1);
    assert_eq!(upstream.calls_to("http://up/noarch/repodata.json"), 1);

    let pkg = service.index().get_package("m", "demo").unwrap();
    assert_eq!(pkg.versions[0].uploader.as_deref(), Some("alice"));
}

#[test]
fn url_without_mode_creates_proxy_without_network() {
    let (_dir, service, upstream) = setup(FakeUpstream {
        offline: true,
        ..FakeUpstream::default()
    });
    let (record, report) = service
        .create_channel(&spec("p", Some("http://my_remote_host"), None), None)
        .unwrap();
    assert_eq!(record.mode(), MirrorMode::Proxy);
    assert_eq!(
        record.source.mirror_url().map(|u| u.as_str()),
        Some("http://my_remote_host")
    );
    assert!(report.is_none());
    assert_eq!(upstream.total_calls(), 0);
}

#[test]
fn duplicate_channel_rejected() {
    let (_dir, service, _upstream) = setup(FakeUpstream::default());
    service.create_channel(&spec("c", None, None), None).unwrap();
    let err = service.create_channel(&spec("c", None, None), None).unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::ChannelExists(_))));
}

#[test]
fn writes_rejected_on_proxy_and_mirror_channels() {
    let (_dir, service, upstream) = setup(FakeUpstream::default());
    upstream.serve("http://up/channeldata.json", br#"{"subdirs": []}"#);
    service
        .create_channel(&spec("p", Some("http://up"), Some(MirrorMode::Proxy)), None)
        .unwrap();
    service
        .create_channel(&spec("m", Some("http://up"), Some(MirrorMode::Mirror)), None)
        .unwrap();

    for (channel, mode) in [("p", MirrorMode::Proxy), ("m", MirrorMode::Mirror)] {
        let err = service.create_package(channel, "demo", None).unwrap_err();
        assert!(matches!(err, CoreError::NotImplemented { mode: m } if m == mode));
        assert!(err.to_string().contains("not implemented"));

        let err = service
            .upload(channel, &UploadTarget::default(), &archive("demo", "1.0", "noarch"), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotImplemented { .. }));
    }
    assert!(!service.store().exists("p", "noarch/demo-1.0-0.tar.bz2").unwrap());
    assert!(service.list_packages("m").unwrap().is_empty());
}

#[test]
fn resync_rejected_for_proxy_and_local() {
    let (_dir, service, _upstream) = setup(FakeUpstream::default());
    service.create_channel(&spec("l", None, None), None).unwrap();
    service
        .create_channel(&spec("p", Some("http://up"), None), None)
        .unwrap();
    for channel in ["l", "p"] {
        let err = service
            .resync(channel, condor_core::SubdirSelection::All, &Default::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::NotAMirror { .. }));
    }
}

#[test]
fn proxy_caches_archives_and_refreshes_indices() {
    let (_dir, service, upstream) = setup(FakeUpstream::default());
    service
        .create_channel(&spec("p", Some("http://host"), None), None)
        .unwrap();
    upstream.serve("http://host/somefile.txt", b"Hello world!");
    upstream.serve("http://host/repodata.json", b"{}");

    let first = read_all(service.serve_file("p", "somefile.txt").unwrap());
    assert_eq!(upstream.calls_to("http://host/somefile.txt"), 1);
    let second = read_all(service.serve_file("p", "somefile.txt").unwrap());
    assert_eq!(upstream.calls_to("http://host/somefile.txt"), 1);
    assert_eq!(first, b"Hello world!");
    assert_eq!(first, second);

    service.serve_file("p", "repodata.json").unwrap();
    upstream.serve("http://host/repodata.json", br#"{"packages": {}}"#);
    let fresh = read_all(service.serve_file("p", "repodata.json").unwrap());
    assert_eq!(upstream.calls_to("http://host/repodata.json"), 2);
    assert_eq!(fresh, br#"{"packages": {}}"#);
}

#[test]
fn proxy_passes_through_upstream_not_found() {
    let (_dir, service, _upstream) = setup(FakeUpstream::default());
    service
        .create_channel(&spec("p", Some("http://host"), None), None)
        .unwrap();
    let err = service.serve_file("p", "missing.tar.bz2").unwrap_err();
    assert!(matches!(err, CoreError::Remote(RemoteError::NotFound(_))));
    assert!(!service.store().exists("p", "missing.tar.bz2").unwrap());
}

#[test]
fn proxy_never_creates_package_records() {
    let (_dir, service, upstream) = setup(FakeUpstream::default());
    service
        .create_channel(&spec("p", Some("http://host"), None), None)
        .unwrap();
    upstream.serve("http://host/noarch/demo-1.0-0.tar.bz2", &archive("demo", "1.0", "noarch"));
    service.serve_file("p", "noarch/demo-1.0-0.tar.bz2").unwrap();
    assert!(service.list_packages("p").unwrap().is_empty());
}

#[test]
fn local_upload_stores_and_indexes() {
    let (_dir, service, _upstream) = setup(FakeUpstream::default());
    service.create_channel(&spec("local", None, None), None).unwrap();
    service.create_package("local", "demo", Some("A demo")).unwrap();

    let data = archive("demo", "1.0", "linux-64");
    let pkg = service
        .upload(
            "local",
            &UploadTarget {
                subdir: None,
                package: Some("demo".to_owned()),
            },
            &data,
            Some("bob"),
        )
        .unwrap();
    assert_eq!(pkg.path(), "linux-64/demo-1.0-0.tar.bz2");

    let stored = read_all(service.serve_file("local", "linux-64/demo-1.0-0.tar.bz2").unwrap());
    assert_eq!(stored, data);

    let record = service.index().get_package("local", "demo").unwrap();
    assert_eq!(record.summary.as_deref(), Some("A demo"));
    assert_eq!(record.latest_version.as_deref(), Some("1.0"));

    let repodata: serde_json::Value = serde_json::from_slice(&read_all(
        service.serve_file("local", "linux-64/repodata.json").unwrap(),
    ))
    .unwrap();
    assert_eq!(
        repodata["packages"]["demo-1.0-0.tar.bz2"]["sha256"],
        pkg.sha256.as_str()
    );
    let channeldata: serde_json::Value =
        serde_json::from_slice(&read_all(service.serve_file("local", "channeldata.json").unwrap()))
            .unwrap();
    assert_eq!(channeldata["packages"]["demo"]["summary"], "A demo");
}

#[test]
fn upload_rejects_name_mismatch_and_bad_archives() {
    let (_dir, service, _upstream) = setup(FakeUpstream::default());
    service.create_channel(&spec("local", None, None), None).unwrap();

    let err = service
        .upload(
            "local",
            &UploadTarget {
                subdir: None,
                package: Some("other".to_owned()),
            },
            &archive("demo", "1.0", "noarch"),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::PackageMismatch { .. }));

    let err = service
        .upload("local", &UploadTarget::default(), b"dfdf", None)
        .unwrap_err();
    assert!(matches!(err, CoreError::Archive(_)));
    assert!(service.list_packages("local").unwrap().is_empty());
}

#[test]
fn upload_rejects_malformed_subdirs() {
    let (dir, service, _upstream) = setup(FakeUpstream::default());
    service.create_channel(&spec("local", None, None), None).unwrap();

    for subdir in ["a/b", "../escape", "Linux 64!"] {
        let target = UploadTarget {
            subdir: Some(subdir.to_owned()),
            package: None,
        };
        let err = service
            .upload("local", &target, &archive("demo", "1.0", ""), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Archive(_)), "{subdir}: {err}");
    }

    let err = service
        .upload("local", &UploadTarget::default(), &archive("demo", "1.0", "Linux 64!"), None)
        .unwrap_err();
    assert!(matches!(err, CoreError::Archive(_)));

    assert!(service.list_packages("local").unwrap().is_empty());
    assert!(!dir.path().join("files/escape").exists());
    assert!(!dir.path().join("files/local/a").exists());
}

#[test]
fn local_file_missing_is_not_found() {
    let (_dir, service, _upstream) = setup(FakeUpstream::default());
    service.create_channel(&spec("local", None, None), None).unwrap();
    let err = service.serve_file("local", "noarch/nothing.tar.bz2").unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::FileNotFound { .. })));
}
