use alloc::{string::String, vec::Vec};

use embassy_futures::block_on;
use sdcard::{
    fat::{self, FatTimestamp, FatVolume, FormatOptions},
    BlockDevice, RamDisk,
};

use super::path::{basename, dirname, extension, is_within, join, to_volume_path, validate_path};
use super::search::name_matches;
use super::*;
use crate::types::DirectorySize;

fn volume() -> (RamDisk, FatVolume) {
    let mut disk = RamDisk::new(8192);
    block_on(disk.init()).unwrap();
    let options = FormatOptions {
        cluster_size: 1024,
        ..FormatOptions::default()
    };
    block_on(fat::format_volume(&mut disk, &options)).unwrap();
    let volume = block_on(fat::mount(&mut disk)).unwrap();
    (disk, volume)
}

fn code<T: core::fmt::Debug>(result: Result<T, FsError>) -> StorageError {
    result.unwrap_err().code()
}

fn sorted_names(listing: &crate::types::DirectoryListing) -> Vec<String> {
    let mut names: Vec<String> = listing.iter().map(|info| info.name.clone()).collect();
    names.sort();
    names
}

#[test]
fn written_bytes_read_back_exactly() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        fs.create_directory("/t", &MkdirOptions::default()).await.unwrap();
        fs.write_file("/t/a.txt", b"hello", &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(fs.read_file("/t/a.txt").await.unwrap(), b"hello");
        let info = fs.stat("/t/a.txt").await.unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.size, 5);
        assert!(!info.is_directory);
        assert!(info.is_writable());
        assert_eq!(code(fs.read_file("/t/missing").await), StorageError::NotFound);
    });
}

#[test]
fn write_modes_follow_options() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        let no_create = WriteOptions {
            create_if_missing: false,
            ..WriteOptions::default()
        };
        assert_eq!(
            code(fs.write_file("/f.txt", b"x", &no_create).await),
            StorageError::NotFound
        );

        fs.append_file("/f.txt", b"abc").await.unwrap();
        fs.append_file("/f.txt", b"def").await.unwrap();
        assert_eq!(fs.read_file("/f.txt").await.unwrap(), b"abcdef");

        fs.write_file("/f.txt", b"XY", &WriteOptions::overwrite())
            .await
            .unwrap();
        assert_eq!(fs.read_file("/f.txt").await.unwrap(), b"XYcdef");

        fs.write_file("/f.txt", b"new", &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(fs.read_file("/f.txt").await.unwrap(), b"new");

        assert_eq!(
            code(fs.write_file("/", b"x", &WriteOptions::default()).await),
            StorageError::InvalidArg
        );
    });
}

#[test]
fn read_only_permission_blocks_changes() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        let locked = WriteOptions {
            permissions: 0o444,
            ..WriteOptions::default()
        };
        fs.write_file("/ro.bin", b"keep", &locked).await.unwrap();
        let info = fs.stat("/ro.bin").await.unwrap();
        assert!(!info.is_writable());
        assert_eq!(info.permissions, 0o555);

        assert_eq!(
            code(fs.write_file("/ro.bin", b"x", &WriteOptions::default()).await),
            StorageError::Fail
        );
        assert_eq!(code(fs.append_file("/ro.bin", b"x").await), StorageError::Fail);
        assert_eq!(code(fs.delete_file("/ro.bin").await), StorageError::Fail);
        assert_eq!(fs.read_file("/ro.bin").await.unwrap(), b"keep");
    });
}

#[test]
fn delete_and_move_report_missing_sources() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        assert_eq!(code(fs.delete_file("/nope").await), StorageError::NotFound);
        assert_eq!(code(fs.move_file("/nope", "/x").await), StorageError::NotFound);

        fs.create_directory("/dir", &MkdirOptions::default()).await.unwrap();
        assert_eq!(code(fs.delete_file("/dir").await), StorageError::InvalidArg);

        fs.write_file("/a.txt", b"moved", &WriteOptions::default())
            .await
            .unwrap();
        fs.move_file("/a.txt", "/dir/b.txt").await.unwrap();
        assert!(!fs.exists("/a.txt").await.unwrap());
        assert_eq!(fs.read_file("/dir/b.txt").await.unwrap(), b"moved");

        fs.delete_file("/dir/b.txt").await.unwrap();
        assert!(!fs.is_file("/dir/b.txt").await.unwrap());
    });
}

#[test]
fn mkdir_with_parents_is_idempotent() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        let options = MkdirOptions::default();
        fs.create_directory("/a/b/c", &options).await.unwrap();
        for path in ["/a", "/a/b", "/a/b/c"] {
            assert!(fs.is_directory(path).await.unwrap(), "{path}");
        }
        fs.create_directory("/a/b/c", &options).await.unwrap();

        let strict = MkdirOptions {
            create_parents: false,
            ..options
        };
        assert_eq!(
            code(fs.create_directory("/a/b", &strict).await),
            StorageError::Fail
        );
        assert_eq!(
            code(fs.create_directory("/x/y", &strict).await),
            StorageError::NotFound
        );

        fs.write_file("/a/file", b"1", &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            code(fs.create_directory("/a/file/sub", &options).await),
            StorageError::Fail
        );
    });
}

#[test]
fn directory_size_counts_the_root_directory() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        fs.create_directory("/d", &MkdirOptions::default()).await.unwrap();
        fs.write_file("/d/x", &[1; 10], &WriteOptions::default())
            .await
            .unwrap();
        fs.write_file("/d/y", &[2; 20], &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            fs.calculate_directory_size("/d").await.unwrap(),
            DirectorySize {
                total_bytes: 30,
                file_count: 2,
                dir_count: 1,
            }
        );

        fs.create_directory("/d/sub", &MkdirOptions::default()).await.unwrap();
        fs.write_file("/d/sub/z", &[3; 5], &WriteOptions::default())
            .await
            .unwrap();
        let size = fs.calculate_directory_size("/d").await.unwrap();
        assert_eq!((size.total_bytes, size.file_count, size.dir_count), (35, 3, 2));

        let stats = fs.usage().await.unwrap();
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.dir_count, 2);
        assert_eq!(stats.total_bytes, stats.used_bytes + stats.free_bytes);
        assert!(stats.used_bytes > 0);
    });
}

#[test]
fn rmdir_needs_recursive_for_contents() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        let free_before = fat::free_bytes(fs.sd, fs.volume).await.unwrap();
        fs.create_directory("/r/s/t", &MkdirOptions::default()).await.unwrap();
        fs.write_file("/r/one", b"1", &WriteOptions::default())
            .await
            .unwrap();
        fs.write_file("/r/s/t/two", b"2", &WriteOptions::default())
            .await
            .unwrap();

        let flat = RmdirOptions::default();
        assert_eq!(
            code(fs.remove_directory("/r", &flat).await),
            StorageError::InvalidArg
        );
        assert_eq!(
            code(fs.remove_directory("/missing", &flat).await),
            StorageError::NotFound
        );
        assert_eq!(
            code(fs.remove_directory("/r/one", &flat).await),
            StorageError::InvalidArg
        );
        assert_eq!(
            code(fs.remove_directory("/", &RmdirOptions { recursive: true }).await),
            StorageError::InvalidArg
        );

        fs.remove_directory("/r", &RmdirOptions { recursive: true })
            .await
            .unwrap();
        assert!(!fs.exists("/r").await.unwrap());
        assert!(fs.list_directory("/").await.unwrap().is_empty());
        assert_eq!(fat::free_bytes(fs.sd, fs.volume).await.unwrap(), free_before);
    });
}

#[test]
fn copy_file_honours_overwrite_and_timestamps() {
    let (mut disk, mut volume) = volume();
    volume.set_time(FatTimestamp::from_unix(1_600_000_000));
    block_on(async {
        let mut fs = Filesystem::new(&mut disk, &mut volume);
        fs.write_file("/src.txt", b"payload", &WriteOptions::default())
            .await
            .unwrap();
        fs.write_file("/dst.txt", b"old", &WriteOptions::default())
            .await
            .unwrap();
    });
    volume.set_time(FatTimestamp::from_unix(1_700_000_000));
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        let options = CopyOptions::default();
        assert_eq!(
            code(fs.copy_file("/none", "/x", &options).await),
            StorageError::NotFound
        );
        assert_eq!(
            code(fs.copy_file("/src.txt", "/dst.txt", &options).await),
            StorageError::InvalidArg
        );

        let overwrite = CopyOptions {
            overwrite_existing: true,
            ..options
        };
        fs.copy_file("/src.txt", "/dst.txt", &overwrite).await.unwrap();
        assert_eq!(fs.read_file("/dst.txt").await.unwrap(), b"payload");
        assert_eq!(fs.stat("/dst.txt").await.unwrap().modified, 1_600_000_000);

        let fresh = CopyOptions {
            preserve_timestamps: false,
            ..options
        };
        fs.copy_file("/src.txt", "/fresh.txt", &fresh).await.unwrap();
        assert_eq!(fs.stat("/fresh.txt").await.unwrap().modified, 1_700_000_000);
    });
}

#[test]
fn copy_directory_mirrors_the_tree() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        fs.create_directory("/src/inner", &MkdirOptions::default())
            .await
            .unwrap();
        fs.write_file("/src/a", b"A", &WriteOptions::default())
            .await
            .unwrap();
        fs.write_file("/src/inner/b", b"BB", &WriteOptions::default())
            .await
            .unwrap();

        let options = CopyOptions::default();
        assert_eq!(
            code(fs.copy_directory("/src", "/src/inner/loop", &options).await),
            StorageError::InvalidArg
        );

        fs.copy_directory("/src", "/dst", &options).await.unwrap();
        assert_eq!(fs.read_file("/dst/a").await.unwrap(), b"A");
        assert_eq!(fs.read_file("/dst/inner/b").await.unwrap(), b"BB");
        assert_eq!(
            code(fs.copy_directory("/src", "/dst", &options).await),
            StorageError::InvalidArg
        );

        let shallow = CopyOptions {
            recursive: false,
            ..options
        };
        fs.copy_directory("/src", "/empty", &shallow).await.unwrap();
        assert!(fs.list_directory("/empty").await.unwrap().is_empty());
    });
}

#[test]
fn listing_skips_dot_entries() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        fs.create_directory("/l/child", &MkdirOptions::default())
            .await
            .unwrap();
        fs.write_file("/l/Readme.md", b"#", &WriteOptions::default())
            .await
            .unwrap();
        let listing = fs.list_directory("/l").await.unwrap();
        assert_eq!(sorted_names(&listing), ["Readme.md", "child"]);
        assert!(listing.find("child").unwrap().is_directory);
        assert_eq!(
            code(fs.list_directory("/nowhere").await),
            StorageError::NotFound
        );
    });
}

#[test]
fn search_walks_depth_first_with_relative_names() {
    let (mut disk, mut volume) = volume();
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        fs.create_directory("/s/sub/deep", &MkdirOptions::default())
            .await
            .unwrap();
        for path in ["/s/a.txt", "/s/b.log", "/s/sub/c.txt", "/s/sub/deep/d.TXT"] {
            fs.write_file(path, b"x", &WriteOptions::default())
                .await
                .unwrap();
        }

        let hits = fs
            .search_files("/s", &SearchOptions::matching("*.txt"))
            .await
            .unwrap();
        assert_eq!(sorted_names(&hits), ["a.txt", "sub/c.txt", "sub/deep/d.TXT"]);

        let exact_case = SearchOptions {
            case_sensitive: true,
            ..SearchOptions::matching("*.txt")
        };
        assert_eq!(fs.search_files("/s", &exact_case).await.unwrap().len(), 2);

        let dirs = SearchOptions {
            include_directories: true,
            ..SearchOptions::matching("sub")
        };
        let hits = fs.search_files("/s", &dirs).await.unwrap();
        assert_eq!(sorted_names(&hits), ["sub"]);
        assert!(hits.entries()[0].is_directory);

        let capped = SearchOptions {
            max_results: 1,
            ..SearchOptions::matching(".txt")
        };
        assert_eq!(fs.search_files("/s", &capped).await.unwrap().len(), 1);

        let flat = SearchOptions {
            recursive: false,
            ..SearchOptions::matching("txt")
        };
        let hits = fs.search_files("/s", &flat).await.unwrap();
        assert_eq!(sorted_names(&hits), ["a.txt"]);
    });
}

#[test]
fn tree_walks_stop_once_the_deadline_has_passed() {
    let (mut disk, mut volume) = volume();
    {
        let mut fs = Filesystem::new(&mut disk, &mut volume);
        block_on(async {
            fs.create_directory("/logs/old", &MkdirOptions::default())
                .await
                .unwrap();
            fs.write_file("/logs/old/a.txt", b"abc", &WriteOptions::default())
                .await
                .unwrap();
        });
    }

    volume.set_deadline(Some(embassy_time::Instant::now()));
    let mut fs = Filesystem::new(&mut disk, &mut volume);
    block_on(async {
        let late = FsError::Fat(sdcard::fat::SdFatError::DeadlineExceeded);
        assert_eq!(fs.calculate_directory_size("/logs").await, Err(late));
        assert_eq!(
            fs.search_files("/", &SearchOptions::default()).await,
            Err(late)
        );
        assert_eq!(
            fs.remove_directory("/logs", &RmdirOptions { recursive: true })
                .await,
            Err(late)
        );
        assert!(fs.exists("/logs/old/a.txt").await.unwrap());
        assert_eq!(late.code(), StorageError::Timeout);
    });
}

#[test]
fn name_patterns() {
    assert!(name_matches("", "anything", true));
    assert!(name_matches("*.TXT", "notes.txt", false));
    assert!(!name_matches("*.TXT", "notes.txt", true));
    assert!(name_matches("a?c*", "abcdef", true));
    assert!(!name_matches("a?c", "abcd", true));
    assert!(name_matches("*b*d", "abcabd", true));
    assert!(name_matches("log", "syslog.old", false));
    assert!(!name_matches("log", "sys.lg", false));
}

#[test]
fn path_helpers() {
    assert_eq!(basename("/a/b.txt"), "b.txt");
    assert_eq!(basename("/a/dir/"), "dir");
    assert_eq!(basename("/"), "/");
    assert_eq!(dirname("/a/b.txt"), "/a");
    assert_eq!(dirname("/a"), "/");
    assert_eq!(dirname("file"), ".");
    assert_eq!(extension("/a/archive.tar.gz"), Some("gz"));
    assert_eq!(extension("/a/.profile"), None);
    assert_eq!(extension("/a/noext"), None);
    assert_eq!(join("/", "a"), "/a");
    assert_eq!(join("/d/", "/x"), "/d/x");
    assert_eq!(join("/d", ""), "/d");
    assert!(is_within("/a/b", "/a"));
    assert!(is_within("/a", "/a"));
    assert!(!is_within("/ab", "/a"));
    assert_eq!(to_volume_path("/sdcard", "/sdcard/x/y"), "/x/y");
    assert_eq!(to_volume_path("/sdcard", "/sdcard"), "/");
    assert_eq!(to_volume_path("/sdcard", "/sdcardx"), "/sdcardx");
    assert_eq!(to_volume_path("/", "/x"), "/x");
    assert_eq!(validate_path("/ok"), Ok(()));
    assert_eq!(validate_path("rel"), Err(StorageError::InvalidArg));
    assert_eq!(validate_path(""), Err(StorageError::InvalidArg));
    let long = alloc::format!("/{}", "a".repeat(300));
    assert_eq!(validate_path(&long), Err(StorageError::InvalidSize));
}
