//! End-to-end filesystem scenarios over a seeded tree.
//!
//! Seeded layout:
//! ```text
//! /empty.txt        ""
//! /file             "This is file!"
//! /empty_folder/
//! /folder/
//!   file_inner.txt  "This is inner file."
//!   strangeF!LE     "\n\ts\nt\tr\n\ta\ng\t\t\te\n\n\n\t"
//!   empty_folder_2/
//!   folder_2/
//!     empty_file    ""
//! ```

use std::io::Write;
use std::path::PathBuf;

use onefs::prelude::*;

fn scratch() -> (tempfile::TempDir, PathBuf) {
  let dir = tempfile::tempdir().unwrap();
  let container = dir.path().join("tree.onefs");
  (dir, container)
}

async fn seeded(container: &std::path::Path) -> OneFs {
  let fs = OneFs::open(container, CapturePolicy::WritePriority).unwrap();

  fs.with_mutable_folder(|ctx| async move {
    ctx.create_file("empty.txt", b"")?;
    ctx.create_file("file", b"This is file!")?;
    ctx.create_folder("empty_folder")?;
    ctx.create_folder("folder")?;

    ctx.cd("folder")?;
    ctx.create_file("file_inner.txt", b"This is inner file.")?;
    ctx.create_file("strangeF!LE", b"\n\ts\nt\tr\n\ta\ng\t\t\te\n\n\n\t")?;
    ctx.create_folder("empty_folder_2")?;
    ctx.create_folder("folder_2")?;

    ctx.cd("folder_2")?;
    ctx.create_file("empty_file", b"")?;

    ctx.cd("/")?;
    Ok::<_, Error>(())
  })
  .await
  .unwrap();

  fs
}

#[tokio::test]
async fn navigation_moves_the_cursor() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  fs.cd("/folder/empty_folder_2").await.unwrap();
  assert_eq!(fs.current_path().await, "/folder/empty_folder_2/");

  fs.back().await.unwrap();
  assert_eq!(fs.current_path().await, "/folder/");

  fs.cd("folder_2").await.unwrap();
  assert_eq!(fs.current_path().await, "/folder/folder_2/");

  let missing = fs.cd("/folder/nowhere").await;
  assert!(matches!(missing, Err(Error::DirectoryNotFound(_))));
}

#[tokio::test]
async fn glob_find_matches_text_files() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  let mut names = fs
    .with_folder(|ctx| async move {
      let mut names = vec![];
      for loader in ctx.find_files("**/*.txt", true)? {
        names.push(loader?.name().to_string());
      }
      Ok::<_, Error>(names)
    })
    .await
    .unwrap();

  names.sort();
  assert_eq!(names, ["empty.txt", "file_inner.txt"]);
}

#[tokio::test]
async fn glob_find_is_anchored_to_absolute_paths() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  let paths = fs
    .with_folder(|ctx| async move {
      let mut paths = vec![];
      for loader in ctx.find_files("/folder/*", true)? {
        paths.push(loader?.path().to_string());
      }
      Ok::<_, Error>(paths)
    })
    .await
    .unwrap();

  assert!(paths.contains(&"/folder/file_inner.txt".to_string()));
  assert!(paths.contains(&"/folder/strangeF!LE".to_string()));
  assert_eq!(paths.len(), 2);
}

#[tokio::test]
async fn stale_digests_fail_validation_until_updated() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  fs.with_mutable_folder(|ctx| async move {
    let mut writer = ctx.output_stream("empty.txt", -1)?;
    writer.write_all(b"Some text")?;

    ctx.append_into_file("file", b"\nJust appended text")?;
    Ok::<_, Error>(())
  })
  .await
  .unwrap();

  let clean = fs.with_folder(|ctx| async move { ctx.validate() }).await.unwrap();
  assert!(!clean, "digests are stale after raw writes");

  fs.with_mutable_folder(|ctx| async move {
    ctx.update_md5("file")?;
    ctx.update_md5("empty.txt")?;
    Ok::<_, Error>(())
  })
  .await
  .unwrap();

  let clean = fs.with_folder(|ctx| async move { ctx.validate() }).await.unwrap();
  assert!(clean);

  let appended = fs
    .with_folder(|ctx| async move { ctx.read_file("file") })
    .await
    .unwrap();
  assert_eq!(appended, b"This is file!\nJust appended text");
}

#[tokio::test]
async fn positional_writes_overwrite_in_place() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  fs.with_mutable_folder(|ctx| async move {
    ctx.clear_file("file")?;

    let mut writer = ctx.output_stream("file", -1)?;
    writer.write_all(b"This is file.")?;

    let mut writer = ctx.output_stream("file", 8)?;
    writer.write_all(b"FILE")?;

    ctx.update_md5("file")?;
    Ok::<_, Error>(())
  })
  .await
  .unwrap();

  let content = fs
    .with_folder(|ctx| async move { ctx.read_file("file") })
    .await
    .unwrap();
  assert_eq!(content, b"This is FILE.");

  let clean = fs.with_folder(|ctx| async move { ctx.validate() }).await.unwrap();
  assert!(clean);
}

#[tokio::test]
async fn copy_folder_with_overwrite_replaces_the_destination() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  fs.cd("/folder").await.unwrap();

  let denied = fs
    .with_mutable_folder(|ctx| async move {
      ctx.copy_folder("empty_folder_2", "/empty_folder", false)
    })
    .await;
  assert!(matches!(denied, Err(Error::DirectoryAlreadyExists(_))));

  fs.with_mutable_folder(|ctx| async move {
    ctx.copy_folder("empty_folder_2", "/empty_folder", true)
  })
  .await
  .unwrap();

  fs.cd("/empty_folder").await.unwrap();
  let listing = fs
    .with_folder(|ctx| async move { ctx.current_folder() })
    .await
    .unwrap();
  assert!(listing.is_empty());
}

#[tokio::test]
async fn copy_file_duplicates_content_and_digest() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  fs.with_mutable_folder(|ctx| async move {
    ctx.copy_file("file", "/folder/file_copy", false)
  })
  .await
  .unwrap();

  let (original, copy, clean) = fs
    .with_folder(|ctx| async move {
      let original = ctx.read_file("file")?;
      let copy = ctx.store().data_cell(&FsPath::parse("/folder/file_copy")?)?.read_to_vec()?;
      let clean = ctx.validate()?;
      Ok::<_, Error>((original, copy, clean))
    })
    .await
    .unwrap();

  assert_eq!(original, copy);
  assert!(clean);
}

#[tokio::test]
async fn move_file_into_a_folder_keeps_the_name() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  fs.with_mutable_folder(|ctx| async move { ctx.move_file("file", "/folder/", false) })
    .await
    .unwrap();

  let found = fs
    .with_folder(|ctx| async move {
      let gone = ctx.read_file("file").is_err();
      let moved = ctx
        .store()
        .data_cell(&FsPath::parse("/folder/file")?)?
        .read_to_vec()?;
      Ok::<_, Error>((gone, moved))
    })
    .await
    .unwrap();

  assert!(found.0);
  assert_eq!(found.1, b"This is file!");
}

#[tokio::test]
async fn recursive_delete_removes_the_subtree() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  fs.with_mutable_folder(|ctx| async move { ctx.delete_folder("folder") })
    .await
    .unwrap();

  let listing = fs
    .with_folder(|ctx| async move { ctx.current_folder() })
    .await
    .unwrap();

  assert!(listing.folder("folder").is_none());
  assert_eq!(listing.files().len(), 2);
  assert_eq!(listing.folders().len(), 1);
}

#[tokio::test]
async fn host_import_lands_with_a_valid_digest() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  let host_dir = tempfile::tempdir().unwrap();
  let host_file = host_dir.path().join("testFile.txt");
  std::fs::write(&host_file, b"Hello, that's a test file!").unwrap();

  fs.with_mutable_folder(|ctx| async move {
    ctx.import_file("./", &HostImporter, host_file.as_path())
  })
  .await
  .unwrap();

  let (bytes, clean) = fs
    .with_folder(|ctx| async move {
      let bytes = ctx.read_file("testFile.txt")?;
      let clean = ctx.validate()?;
      Ok::<_, Error>((bytes, clean))
    })
    .await
    .unwrap();

  assert_eq!(bytes, b"Hello, that's a test file!");
  assert!(clean);
}

#[tokio::test]
async fn host_directory_import_preserves_the_tree() {
  let (_dir, container) = scratch();
  let fs = seeded(&container).await;

  let host_dir = tempfile::tempdir().unwrap();
  std::fs::create_dir(host_dir.path().join("nested")).unwrap();
  std::fs::write(host_dir.path().join("top.bin"), b"top").unwrap();
  std::fs::write(host_dir.path().join("nested/deep.bin"), b"deep").unwrap();

  let host_root = host_dir.path().to_path_buf();

  fs.with_mutable_folder(|ctx| async move {
    ctx.import_directory("/imported", &HostImporter, host_root.as_path())
  })
  .await
  .unwrap();

  let (top, deep, clean) = fs
    .with_folder(|ctx| async move {
      let store = ctx.store();
      let top = store.data_cell(&FsPath::parse("/imported/top.bin")?)?.read_to_vec()?;
      let deep = store
        .data_cell(&FsPath::parse("/imported/nested/deep.bin")?)?
        .read_to_vec()?;
      let clean = ctx.validate()?;
      Ok::<_, Error>((top, deep, clean))
    })
    .await
    .unwrap();

  assert_eq!(top, b"top");
  assert_eq!(deep, b"deep");
  assert!(clean);
}

#[tokio::test]
async fn reopened_container_reproduces_the_tree() {
  let (_dir, container) = scratch();

  {
    let fs = seeded(&container).await;
    drop(fs);
  }

  let fs = OneFs::open(&container, CapturePolicy::ReadPriority).unwrap();

  let (names, inner, clean) = fs
    .with_folder(|ctx| async move {
      let mut names = vec![];
      for loader in ctx.find_files("**", true)? {
        names.push(loader?.path().to_string());
      }
      names.sort();

      let inner = ctx
        .store()
        .data_cell(&FsPath::parse("/folder/file_inner.txt")?)?
        .read_to_vec()?;
      let clean = ctx.validate()?;

      Ok::<_, Error>((names, inner, clean))
    })
    .await
    .unwrap();

  assert_eq!(
    names,
    [
      "/empty.txt",
      "/file",
      "/folder/file_inner.txt",
      "/folder/folder_2/empty_file",
      "/folder/strangeF!LE",
    ]
  );
  assert_eq!(inner, b"This is inner file.");
  assert!(clean);
}
