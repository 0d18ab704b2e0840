mod cli;

use std::io::Write;

use onefs::prelude::*;

#[tokio::main]
async fn main() -> Result<(), onefs::Error> {
  pretty_env_logger::init();

  let cli = cli::parse();

  match cli.command {
    cli::Command::Create { container } => {
      OneFs::open(&container, CapturePolicy::WritePriority)?;
      println!("created container {}", container.display());
    }
    cli::Command::Import {
      container,
      source,
      dest,
    } => {
      let fs = OneFs::open(&container, CapturePolicy::WritePriority)?;

      fs.with_mutable_folder(|ctx| async move {
        if source.is_dir() {
          ctx.import_directory(&dest, &HostImporter, source.as_path())
        } else {
          ctx.import_file(&dest, &HostImporter, source.as_path())
        }
      })
      .await?;

      println!("imported into {}", container.display());
    }
    cli::Command::Ls { container, path } => {
      let fs = OneFs::open(&container, CapturePolicy::ReadPriority)?;
      fs.cd(&path).await?;

      let folder = fs
        .with_folder(|ctx| async move { ctx.current_folder() })
        .await?;

      for sub in folder.folders() {
        println!("{}/", sub.name());
      }
      for file in folder.files() {
        println!("{}", file.name());
      }
    }
    cli::Command::Cat { container, path } => {
      let fs = OneFs::open(&container, CapturePolicy::ReadPriority)?;
      let parsed = FsPath::parse(&path)?;

      if parsed.is_folder() {
        return Err(onefs::Error::FileNotFound(path));
      }

      fs.cd(&parsed.parent().to_string()).await?;

      let name = parsed.name().to_string();
      let bytes = fs
        .with_folder(|ctx| async move { ctx.read_file(&name) })
        .await?;

      std::io::stdout().write_all(&bytes)?;
    }
    cli::Command::Rm { container, path } => {
      let fs = OneFs::open(&container, CapturePolicy::WritePriority)?;
      let parsed = FsPath::parse(&path)?;

      fs.cd(&parsed.parent().to_string()).await?;

      fs.with_mutable_folder(|ctx| async move {
        if parsed.is_folder() {
          ctx.delete_folder(parsed.name())
        } else {
          ctx.delete_file(parsed.name())
        }
      })
      .await?;
    }
    cli::Command::Validate { container } => {
      let fs = OneFs::open(&container, CapturePolicy::ReadPriority)?;

      let clean = fs.with_folder(|ctx| async move { ctx.validate() }).await?;

      if clean {
        println!("all digests match");
      } else {
        println!("stale digest found");
        std::process::exit(1);
      }
    }
    cli::Command::Find { container, pattern } => {
      let fs = OneFs::open(&container, CapturePolicy::ReadPriority)?;

      let matches = fs
        .with_folder(|ctx| async move {
          let mut paths = vec![];

          for loader in ctx.find_files(&pattern, true)? {
            paths.push(loader?.path().to_string());
          }

          Ok::<_, onefs::Error>(paths)
        })
        .await?;

      for path in matches {
        println!("{path}");
      }
    }
  }

  Ok(())
}
