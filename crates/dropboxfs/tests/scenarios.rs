//! End-to-end behavior of the node layer against a scripted remote.

mod common;

use std::sync::Arc;

use dropboxfs::dropbox::{FolderMeta, Metadata, RemoteClient};
use dropboxfs::fs::{inode, NodeCache};
use dropboxfs::sync::ChangeNotifier;

use common::*;

fn setup() -> (Arc<MockRemote>, Arc<NodeCache>) {
    let remote = Arc::new(MockRemote::default());
    let cache = NodeCache::new(remote.clone());
    (remote, cache)
}

#[tokio::test]
async fn cold_list_populates_root() {
    let (remote, cache) = setup();
    remote.set_page(
        "",
        page(
            vec![file_entry("/x", "i1", 3), folder_entry("/y", "i2")],
            "c-end",
            false,
        ),
    );

    let root = cache.get_or_create_directory(FolderMeta::root());
    let entries = root.read_dir_all().await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].ino, inode("i1"));
    assert_eq!(entries[0].name, "x");
    assert!(!entries[0].is_dir);
    assert_eq!(entries[1].ino, inode("i2"));
    assert_eq!(entries[1].name, "y");
    assert!(entries[1].is_dir);

    // The root handle became canonical and populated.
    let cached_root = cache.directory("").expect("root should be cached");
    assert!(Arc::ptr_eq(&cached_root, &root));
    let (files, subdirs, populated) = root.state_snapshot().await;
    assert!(populated);
    assert_eq!(files.len(), 1);
    assert_eq!(subdirs.len(), 1);
}

#[tokio::test]
async fn populated_directory_does_not_refetch() {
    let (remote, cache) = setup();
    remote.set_page("", page(vec![file_entry("/x", "i1", 0)], "c-end", false));

    let root = cache.get_or_create_directory(FolderMeta::root());
    root.read_dir_all().await.unwrap();

    // Replace the scripted listing; a cached directory must not see it.
    remote.set_page("", page(vec![], "c-end", false));
    let entries = root.read_dir_all().await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn lookup_resolves_through_identity_map() {
    let (remote, cache) = setup();
    remote.set_page("", page(vec![file_entry("/x", "i1", 5)], "c-end", false));

    let root = cache.get_or_create_directory(FolderMeta::root());
    let first = match root.lookup("x").await.unwrap() {
        dropboxfs::fs::Node::File(f) => f,
        _ => panic!("expected a file"),
    };

    // Once canonical (after open), repeated lookups return the same handle.
    remote.set_download("/x", b"hello");
    first.open().await.unwrap();
    let second = match root.lookup("x").await.unwrap() {
        dropboxfs::fs::Node::File(f) => f,
        _ => panic!("expected a file"),
    };
    assert!(Arc::ptr_eq(&first, &second));

    assert!(matches!(
        root.lookup("missing").await,
        Err(dropboxfs::ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn write_buffer_splice_and_release_upload() {
    let (remote, cache) = setup();
    let file = cache.new_file_handle(file_meta("/f", "i1", 11));
    file.seed_data(b"hello world".to_vec(), false).await;
    cache.insert_file("/f", file.clone());

    let written = file.write(6, b"WORLD").await;
    assert_eq!(written, 5);

    let (meta, data, _, dirty) = file.state_snapshot().await;
    assert_eq!(data, b"hello WORLD");
    assert_eq!(meta.size, 11);
    assert!(dirty);

    remote.set_upload_result("/f", file_meta("/f", "i1", 11));
    file.release().await.unwrap();

    assert_eq!(remote.uploads(), vec![("/f".to_string(), b"hello WORLD".to_vec())]);
    let (_, _, _, dirty) = file.state_snapshot().await;
    assert!(!dirty);
}

#[tokio::test]
async fn create_then_remote_echoes_back() {
    let (remote, cache) = setup();
    remote.set_page("", page(vec![], "c-end", false));
    remote.set_upload_result("/z", file_meta("/z", "i3", 0));

    let root = cache.get_or_create_directory(FolderMeta::root());
    root.read_dir_all().await.unwrap();

    let created = root.create("z").await.unwrap();
    assert_eq!(remote.uploads(), vec![("/z".to_string(), Vec::new())]);

    // The new handle is canonical and the parent lists it.
    let cached = cache.file("/z").expect("created file should be cached");
    assert!(Arc::ptr_eq(&cached, &created));
    let (files, _, _) = root.state_snapshot().await;
    assert!(files.iter().any(|f| f.name == "z" && f.id == "i3"));

    // The change feed echoes the create back. The handle is clean, so it is
    // replaced, and the parent listing is evicted.
    let notifier = ChangeNotifier::new(remote.clone(), cache.clone());
    notifier
        .apply_changes(&[file_entry("/z", "i3", 0)])
        .await;

    let replaced = cache.file("/z").expect("file should remain cached");
    assert!(!Arc::ptr_eq(&replaced, &created));
    assert_eq!(replaced.attr().await.ino, inode("i3"));
    assert!(!cache.is_directory_cached(""));
}

#[tokio::test]
async fn rename_across_directories() {
    let (remote, cache) = setup();
    remote.set_page("/A", page(vec![file_entry("/A/f", "i1", 4)], "c-end", false));
    remote.set_page("/B", page(vec![], "c-end", false));
    remote.set_move_result("/B/g", Metadata::File(file_meta("/B/g", "i1", 4)));

    let a = cache.get_or_create_directory(folder_meta("/A", "ia"));
    let b = cache.get_or_create_directory(folder_meta("/B", "ib"));
    a.read_dir_all().await.unwrap();
    b.read_dir_all().await.unwrap();

    a.rename("f", "g", &b).await.unwrap();

    assert_eq!(remote.moves(), vec![("/A/f".to_string(), "/B/g".to_string())]);

    let (a_files, _, _) = a.state_snapshot().await;
    assert!(a_files.iter().all(|f| f.name != "f"));

    let (b_files, _, _) = b.state_snapshot().await;
    let moved = b_files.iter().find(|f| f.name == "g").expect("moved file");
    assert_eq!(moved.path, "/B/g");

    // The old path is no longer cached; both listings refresh next access.
    assert!(!cache.is_file_cached("/A/f"));
}

#[tokio::test]
async fn remove_drops_local_state_before_remote_call() {
    let (remote, cache) = setup();
    remote.set_page("", page(vec![file_entry("/x", "i1", 0)], "c-end", false));

    let root = cache.get_or_create_directory(FolderMeta::root());
    root.read_dir_all().await.unwrap();

    root.remove("x", false).await.unwrap();

    assert_eq!(remote.deletes(), vec!["/x".to_string()]);
    let (files, _, _) = root.state_snapshot().await;
    assert!(files.is_empty());
    assert!(!cache.is_file_cached("/x"));
}

#[tokio::test]
async fn mkdir_appends_to_parent() {
    let (remote, cache) = setup();
    remote.set_page("", page(vec![], "c-end", false));

    let root = cache.get_or_create_directory(FolderMeta::root());
    root.read_dir_all().await.unwrap();

    let sub = root.mkdir("docs").await.unwrap();
    assert_eq!(sub.path(), "/docs");

    let (_, subdirs, _) = root.state_snapshot().await;
    assert!(subdirs.iter().any(|d| d.name == "docs"));
}

#[tokio::test]
async fn paginated_listing_equals_single_page_listing() {
    let (remote, _cache) = setup();

    let all = vec![
        file_entry("/a", "i1", 1),
        file_entry("/b", "i2", 2),
        folder_entry("/c", "i3"),
        file_entry("/d", "i4", 4),
    ];

    // Split the same entries across three pages.
    remote.set_page("/big", page(all[0..2].to_vec(), "cur1", true));
    remote.set_continue("cur1", page(all[2..3].to_vec(), "cur2", true));
    remote.set_continue("cur2", page(all[3..4].to_vec(), "end", false));

    let drained = remote.list_folder_all("/big").await.unwrap();
    assert_eq!(drained, all);
}

#[tokio::test]
async fn open_downloads_once_and_caches() {
    let (remote, cache) = setup();
    remote.set_download("/f", b"content");

    let file = cache.new_file_handle(file_meta("/f", "i1", 7));
    file.open().await.unwrap();
    file.open().await.unwrap();

    assert_eq!(remote.downloads_requested(), vec!["/f".to_string()]);
    assert_eq!(file.read_all().await.unwrap(), b"content");
    assert!(cache.is_file_cached("/f"));
}
