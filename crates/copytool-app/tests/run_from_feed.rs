//! Binary entry point driven end to end. `run` installs the global
//! subscriber, so this test binary holds a single test.

use std::ffi::OsStr;

use clap::Parser;
use copytool_app::{Cli, run};

const FIDS: [&str; 3] = [
    "0x200000401:0x1:0x0",
    "0x200000401:0x2:0x0",
    "0x200000401:0x3:0x0",
];

#[test]
fn run_archives_every_item_of_a_file_feed_before_exiting() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mount = dir.path().join("lustre");
    let store_root = dir.path().join("store");
    let feed = dir.path().join("feed.ndjson");
    std::fs::create_dir_all(&mount)?;

    let mut items = Vec::new();
    for (cookie, fid) in (1_u64..).zip(FIDS) {
        std::fs::write(mount.join(fid), vec![b'a'; 2 * 1024 * 1024])?;
        items.push(serde_json::json!({ "action": "ARCHIVE", "fid": fid, "cookie": cookie }));
    }
    let batch = serde_json::json!({ "fs_name": "lustre", "archive_id": 1, "items": items });
    std::fs::write(&feed, format!("{batch}\n"))?;

    let cli = Cli::try_parse_from([
        OsStr::new("hsm-copytool"),
        OsStr::new("-q"),
        OsStr::new("--store-root"),
        store_root.as_os_str(),
        OsStr::new("--feed"),
        feed.as_os_str(),
        mount.as_os_str(),
    ])?;

    assert_eq!(run(&cli), 0);

    let objects: Vec<_> = std::fs::read_dir(store_root.join("objects"))?
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert_eq!(objects.len(), FIDS.len());
    for entry in objects {
        assert_eq!(entry.metadata()?.len(), 2 * 1024 * 1024);
    }
    Ok(())
}
