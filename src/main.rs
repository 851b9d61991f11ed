// src/main.rs

use std::path::PathBuf;
use anyhow::{bail, Context, Result};
use std::time::Duration;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use tagmount::engine::query::DEFAULT_TOP_K;
use tagmount::config::DEFAULT_DEBOUNCE_MS;
use tagmount::engine::QueryOptions;
use tagmount::{AppState, Config, Librarian, SearchKind, SearchResult, ShowMode, Tagger};

#[derive(Parser, Debug)]
#[command(name = "tagmount", about = "Tag files and browse the tag graph as a directory tree")]
struct Cli {
    /// SQLite file holding the tag graph
    #[arg(long, env = "TAGMOUNT_DB", global = true)]
    db: Option<PathBuf>,

    /// Base URL of the embedding service; the local ranker is used when unset
    #[arg(long, env = "TAGMOUNT_RANKER_URL", global = true)]
    ranker_url: Option<String>,

    /// Quiet window of the daemon's watchers, in milliseconds
    #[arg(long, env = "TAGMOUNT_DEBOUNCE_MS", global = true, default_value_t = DEFAULT_DEBOUNCE_MS)]
    debounce_ms: u64,

    /// Tag newly added files with their extension and file group
    #[arg(
        long,
        env = "TAGMOUNT_TYPE_TAGS",
        global = true,
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    type_tags: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register files
    Add { #[arg(required = true)] paths: Vec<PathBuf> },
    /// Forget files and their tags
    Remove { #[arg(required = true)] paths: Vec<PathBuf> },
    /// Register every file below a directory, tagged by its folders
    Import { dir: PathBuf },
    /// Tag files: FILES... with TAGS...
    Tag { #[arg(required = true, num_args = 3..)] words: Vec<String> },
    /// Remove tags from files: FILES... with TAGS...
    Untag { #[arg(required = true, num_args = 3..)] words: Vec<String> },
    /// Nest tags: TAGS... with PARENTS...
    Metatag { #[arg(required = true, num_args = 3..)] words: Vec<String> },
    /// Merge tag A into tag B: A into B
    Merge { #[arg(required = true, num_args = 3)] words: Vec<String> },
    /// List tags, files or indexed files
    Show {
        #[arg(value_enum, default_value = "tags")]
        what: ShowWhat,
        #[arg(long)]
        path: bool,
    },
    /// Tags of files
    Tags { #[arg(required = true)] files: Vec<String> },
    /// Parent tags of tags
    Metatags { #[arg(required = true)] tags: Vec<String> },
    /// Files matching a tag expression, e.g. `Work and Urgent`
    Query {
        #[arg(required = true)]
        tokens: Vec<String>,
        #[arg(long)]
        path: bool,
        /// Match tag names exactly
        #[arg(long)]
        no_fuzzy: bool,
    },
    /// Rank indexed text files against free text
    Search(SearchArgs),
    /// Rank image files against free text
    SearchImage(SearchArgs),
    /// Make files searchable
    Index {
        /// Re-index files that were indexed before
        #[arg(long)]
        rebuild: bool,
    },
    /// Render the graph under the mount root
    Mount,
    /// Mount under DIR/TagMount from now on
    SetMountRoot { dir: PathBuf },
    /// Directories watched for new files
    #[command(subcommand)]
    AutoImport(AutoImportCommands),
    /// Watch the mounted tree and every auto-import directory
    Daemon,
}

#[derive(Parser, Debug, Clone)]
struct SearchArgs {
    #[arg(required = true)]
    text: Vec<String>,
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
    #[arg(long)]
    path: bool,
}

#[derive(Subcommand, Debug)]
enum AutoImportCommands {
    Add {
        dir: PathBuf,
        /// Index new images for image search
        #[arg(long)]
        images: bool,
        /// Index new documents for text search
        #[arg(long)]
        texts: bool,
    },
    Remove { dir: PathBuf },
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShowWhat {
    Tags,
    Files,
    Index,
}

impl From<ShowWhat> for ShowMode {
    fn from(what: ShowWhat) -> Self {
        match what {
            ShowWhat::Tags => ShowMode::Tags,
            ShowWhat::Files => ShowMode::Files,
            ShowWhat::Index => ShowMode::Index,
        }
    }
}

/// Splits `words` at the first `keyword` (case-insensitive); both sides must be non-empty.
fn split_at(words: &[String], keyword: &str) -> Result<(Vec<String>, Vec<String>)> {
    let Some(pos) = words.iter().position(|w| w.eq_ignore_ascii_case(keyword)) else {
        bail!("expected '{}' between the two argument lists", keyword);
    };
    let (left, right) = (&words[..pos], &words[pos + 1..]);
    if left.is_empty() || right.is_empty() {
        bail!("both sides of '{}' need at least one argument", keyword);
    }
    Ok((left.to_vec(), right.to_vec()))
}

fn print_lines<I: IntoIterator<Item = String>>(lines: I) {
    for line in lines {
        println!("{}", line);
    }
}

fn print_hits(hits: Vec<SearchResult>, path: bool) {
    for hit in hits {
        let shown = if path { &hit.abs_path } else { &hit.filename };
        println!("{:.3}  {}", hit.score, shown);
    }
}

fn run_daemon(state: AppState) -> Result<()> {
    let mut librarian = Librarian::new(state);
    librarian.start()?;
    tracing::info!("Librarian started with {} watcher(s); Ctrl-C to stop", librarian.watcher_count());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;

    tracing::info!("TagMount shutting down...");
    librarian.stop();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::new(cli.db).with_ranker_url(cli.ranker_url);
    config.debounce = Duration::from_millis(cli.debounce_ms);
    config.type_tags = cli.type_tags;

    let state = AppState::open(config)
        .with_context(|| "failed to open the tag graph")?;
    let tagger = Tagger::new(state.clone());

    match cli.command {
        Commands::Add { paths } => {
            let report = tagger.add(&paths)?;
            println!("Added {} new file(s), {} already known", report.added, report.duplicates);
            if report.skipped > 0 {
                println!("Skipped {} path(s) that are not regular files", report.skipped);
            }
        }
        Commands::Remove { paths } => {
            println!("Removed {} file(s)", tagger.remove(&paths)?);
        }
        Commands::Import { dir } => {
            let report = tagger.import(&dir)?;
            println!("Imported {} new file(s), {} already known", report.added, report.duplicates);
        }
        Commands::Tag { words } => {
            let (files, tags) = split_at(&words, "with")?;
            println!("Tagged {} file(s)", tagger.tag(&files, &tags)?);
        }
        Commands::Untag { words } => {
            let (files, tags) = split_at(&words, "with")?;
            println!("Removed {} association(s)", tagger.untag(&files, &tags)?);
        }
        Commands::Metatag { words } => {
            let (tags, parents) = split_at(&words, "with")?;
            println!("Added {} edge(s)", tagger.metatag(&tags, &parents)?);
        }
        Commands::Merge { words } => {
            let (a, b) = split_at(&words, "into")?;
            if tagger.merge(&a[0], &b[0])? {
                println!("Merged {} into {}", a[0], b[0]);
            } else {
                println!("No tag named {}", a[0]);
            }
        }
        Commands::Show { what, path } => print_lines(tagger.show(what.into(), path)?),
        Commands::Tags { files } => print_lines(tagger.tags_of(&files)?),
        Commands::Metatags { tags } => print_lines(tagger.metatags_of(&tags)?),
        Commands::Query { tokens, path, no_fuzzy } => {
            let opts = QueryOptions { show_path: path, fuzzy: !no_fuzzy };
            print_lines(tagger.query(&tokens, opts)?);
        }
        Commands::Search(args) => {
            print_hits(tagger.search(&args.text.join(" "), SearchKind::Text, args.top_k)?, args.path);
        }
        Commands::SearchImage(args) => {
            print_hits(tagger.search(&args.text.join(" "), SearchKind::Image, args.top_k)?, args.path);
        }
        Commands::Index { rebuild } => {
            println!("Indexed {} file(s)", tagger.index(rebuild)?);
        }
        Commands::Mount => {
            let report = tagger.mount()?;
            println!(
                "Created {} director(ies) and {} link(s) under {}",
                report.dirs_created, report.links_created, tagger.mount_root()?.display()
            );
        }
        Commands::SetMountRoot { dir } => {
            println!("Mount root is now {}", tagger.set_mount_root(&dir)?.display());
        }
        Commands::AutoImport(AutoImportCommands::Add { dir, images, texts }) => {
            let entry = tagger.add_auto_import(&dir, images, texts)?;
            println!("Watching {} for new files", entry.path);
        }
        Commands::AutoImport(AutoImportCommands::Remove { dir }) => {
            if tagger.remove_auto_import(&dir)? {
                println!("Stopped watching {}", dir.display());
            } else {
                println!("{} was not an auto-import directory", dir.display());
            }
        }
        Commands::AutoImport(AutoImportCommands::List) => {
            for entry in tagger.auto_import_dirs()? {
                println!("{}  images={} texts={}", entry.path, entry.auto_index_images, entry.auto_index_texts);
            }
        }
        Commands::Daemon => run_daemon(state)?,
    }
    Ok(())
}
