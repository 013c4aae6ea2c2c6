use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use course_catalog::catalog::{
    CategoryRepository, CourseBrowser, CourseQueryEngine, Icon, NewCourse, Phase,
};
use course_catalog::config::Config;
use course_catalog::store::{DocumentStore, SqliteStore, StoreError};
use course_catalog::util::{display_width, truncate_to_width};

/// Width of the course name column in listings.
const NAME_COLUMN: usize = 40;

/// Get the config directory path (~/.config/course-catalog/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("course-catalog"))
}

#[derive(Parser, Debug)]
#[command(
    name = "course-catalog",
    about = "Manage course categories and browse courses by category"
)]
struct Args {
    /// Config file (default: ~/.config/course-catalog/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the config
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the category tree
    Tree {
        /// Show the number of courses in each category's subtree
        #[arg(long)]
        counts: bool,
    },
    /// List the icon keys accepted for categories
    Icons,
    /// Create a category
    AddCategory {
        name: String,
        #[arg(long)]
        icon: Option<String>,
        /// Parent category id (omit for a root category)
        #[arg(long)]
        parent: Option<String>,
    },
    /// Rename a category and set its icon
    RenameCategory {
        id: String,
        name: String,
        /// New icon key (omit to clear the icon)
        #[arg(long)]
        icon: Option<String>,
    },
    /// Delete a category without subcategories
    DeleteCategory { id: String },
    /// Create a course
    AddCourse {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        participants: Option<u64>,
        #[arg(long)]
        rating: Option<f64>,
    },
    /// List courses newest first
    Courses {
        /// Only courses in this category or its subcategories
        #[arg(long)]
        category: Option<String>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| config_dir.join("catalog.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let store = match SqliteStore::open(db_path_str).await {
        Ok(store) => store,
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: The catalog database is locked by another process. Please try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    let store: Arc<dyn DocumentStore> = Arc::new(store);

    let repository = CategoryRepository::new(store.clone(), config.categories_collection.clone());
    let engine = CourseQueryEngine::new(store, config.query_options());

    run(args.command, repository, engine).await
}

async fn run(
    command: Command,
    repository: CategoryRepository,
    engine: CourseQueryEngine,
) -> Result<()> {
    match command {
        Command::Tree { counts } => {
            let tree = repository.list().await.context("Failed to load categories")?;
            let counts = if counts {
                Some(engine.category_counts(&tree).await.context("Failed to count courses")?)
            } else {
                None
            };

            if tree.is_empty() {
                println!("No categories.");
            }
            for (depth, node) in tree.depth_first() {
                let icon = node.icon.map_or("-", Icon::key);
                let count = counts
                    .as_ref()
                    .map(|c| format!(" ({})", c.get(&node.id).copied().unwrap_or(0)))
                    .unwrap_or_default();
                println!(
                    "{}{} [{}] {}{}",
                    "  ".repeat(depth),
                    node.name,
                    icon,
                    node.id,
                    count
                );
            }
            for record in tree.excluded() {
                eprintln!(
                    "Warning: category {} ({}) is part of a parent cycle and was skipped",
                    record.id, record.name
                );
            }
        }
        Command::Icons => {
            for icon in Icon::ALL {
                println!("{icon}");
            }
        }
        Command::AddCategory { name, icon, parent } => {
            if let Some(parent) = parent.as_deref() {
                let tree = repository.list().await.context("Failed to load categories")?;
                if tree.locate(parent).is_none() {
                    anyhow::bail!("Parent category {parent} does not exist");
                }
            }
            let id = repository
                .add(&name, icon.as_deref(), parent.as_deref())
                .await?;
            println!("Created category {id}");
        }
        Command::RenameCategory { id, name, icon } => {
            repository.rename(&id, &name, icon.as_deref()).await?;
            println!("Updated category {id}");
        }
        Command::DeleteCategory { id } => {
            repository.delete(&id).await?;
            println!("Deleted category {id}");
        }
        Command::AddCourse {
            name,
            description,
            category,
            participants,
            rating,
        } => {
            let id = engine
                .create_course(NewCourse {
                    name,
                    description,
                    category_id: category,
                    participants,
                    rating,
                })
                .await?;
            println!("Created course {id}");
        }
        Command::Courses { category, pages } => {
            let mut browser = CourseBrowser::new(repository, engine);
            browser
                .refresh_categories()
                .await
                .context("Failed to load categories")?;
            browser.select_category(category.as_deref())?;

            browser.load_first().await;
            for _ in 1..pages {
                if browser.page().phase() != Phase::Loaded || !browser.load_more().await {
                    break;
                }
            }

            if let Some(err) = browser.page().error() {
                anyhow::bail!("Failed to load courses: {}", err.message);
            }
            print_courses(&browser);
        }
    }
    Ok(())
}

fn print_courses(browser: &CourseBrowser) {
    let page = browser.page();
    if page.items().is_empty() {
        println!("No courses.");
        return;
    }

    for course in page.items() {
        let name = truncate_to_width(&course.name, NAME_COLUMN);
        let padding = NAME_COLUMN.saturating_sub(display_width(&name));
        let created = chrono::DateTime::from_timestamp(course.created_at, 0)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let rating = course
            .rating
            .map(|r| format!("{r:.1}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}{}  {:<20}  {:>10}  {:>4}  {}",
            name,
            " ".repeat(padding),
            truncate_to_width(browser.tree().category_name(course.category_id.as_deref()), 20),
            created,
            rating,
            course.id
        );
    }

    let shown = page.items().len();
    match page.total() {
        Some(total) => println!("\nShowing {shown} of {total} courses"),
        None if page.has_more() => println!("\nShowing {shown} courses, more available"),
        None => println!("\nShowing {shown} courses"),
    }
}
