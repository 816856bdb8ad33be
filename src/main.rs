use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};

use pipadmin_lib::aggregate::DashboardFilter;
use pipadmin_lib::filter::{StudentFilter, SubmissionFilter};
use pipadmin_lib::model::StudentForm;
use pipadmin_lib::validate::ProfileForm;
use pipadmin_lib::{
    import, AppConfig, AppError, Backend, Confirmation, DashboardView, KelurahanView, LogScope,
    RecordId, Status, StudentsView, SubmissionsView, UsersView, ViewContext,
};

#[derive(Debug, Parser)]
#[command(name = "pipadmin", about = "PIP sub-district administration", version)]
struct Cli {
    /// JSON config file; environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Student records.
    #[command(subcommand)]
    Students(StudentsCommand),
    /// Pengajuan (yearly submissions).
    #[command(subcommand)]
    Submissions(SubmissionsCommand),
    /// Recap counts, optionally narrowed by year and kelurahan.
    Dashboard {
        #[arg(long, default_value = "all")]
        year: String,
        #[arg(long, default_value = "all")]
        kelurahan: String,
    },
    /// Kelurahan reference list.
    #[command(subcommand)]
    Kelurahan(KelurahanCommand),
    /// Admin user profiles.
    #[command(subcommand)]
    Users(UsersCommand),
    /// Bulk-insert students from a JSON array of header-keyed rows.
    Import {
        file: PathBuf,
        /// Write a JSON report of the run into this directory.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Local database maintenance.
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum StudentsCommand {
    List {
        #[command(flatten)]
        filter: StudentFilterArgs,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    Add {
        #[command(flatten)]
        form: StudentFormArgs,
    },
    Update {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        form: StudentFormArgs,
    },
    Delete {
        #[arg(long)]
        id: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Args)]
struct StudentFilterArgs {
    #[arg(long, default_value = "")]
    nama: String,
    #[arg(long, default_value = "")]
    nama_ayah: String,
    #[arg(long, default_value = "")]
    nama_ibu: String,
    #[arg(long, default_value = "")]
    rt: String,
    #[arg(long, default_value = "")]
    rw: String,
    #[arg(long, default_value = "")]
    kelurahan: String,
}

#[derive(Debug, Args)]
struct StudentFormArgs {
    #[arg(long)]
    nama_siswa: String,
    #[arg(long, default_value = "")]
    nama_sekolah: String,
    #[arg(long, default_value = "")]
    kelas: String,
    #[arg(long, default_value = "")]
    nama_ayah: String,
    #[arg(long, default_value = "")]
    nama_ibu: String,
    #[arg(long, default_value = "")]
    rt: String,
    #[arg(long, default_value = "")]
    rw: String,
    #[arg(long, default_value = "")]
    kelurahan: String,
    #[arg(long, default_value = "")]
    no_wa: String,
    #[arg(long, default_value = "")]
    keterangan: String,
}

impl From<StudentFormArgs> for StudentForm {
    fn from(args: StudentFormArgs) -> Self {
        StudentForm {
            nama_siswa: args.nama_siswa,
            nama_sekolah: args.nama_sekolah,
            kelas: args.kelas,
            nama_ayah: args.nama_ayah,
            nama_ibu: args.nama_ibu,
            rt: args.rt,
            rw: args.rw,
            kelurahan_id: args.kelurahan,
            no_wa: args.no_wa,
            keterangan: args.keterangan,
        }
    }
}

#[derive(Debug, Subcommand)]
enum SubmissionsCommand {
    List {
        #[arg(long, default_value = "")]
        tahun: String,
        #[arg(long, default_value = "")]
        nama: String,
        #[arg(long, default_value = "")]
        kelurahan: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    Add {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        tahun: String,
    },
    Status {
        #[arg(long)]
        id: String,
        #[arg(long)]
        status: String,
    },
    Note {
        #[arg(long)]
        id: String,
        #[arg(long)]
        text: String,
    },
    Delete {
        #[arg(long)]
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum KelurahanCommand {
    List,
    Add { name: String },
    Rename { id: String, name: String },
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    List,
    Create {
        #[arg(long)]
        nama: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "admin kecamatan")]
        role: String,
        #[arg(long)]
        kelurahan: String,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Create or migrate the local SQLite database.
    Init,
}

fn main() {
    let cli = Cli::parse();
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };
    let logging = match pipadmin_lib::init_logging(config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: start async runtime: {err}");
            process::exit(1);
        }
    };
    let code = match runtime.block_on(handle_cli(config, cli.command)) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err:#}");
            match err.downcast_ref::<AppError>() {
                Some(app) if app.is_validation() || app.is_duplicate() => 2,
                _ => 1,
            }
        }
    };
    drop(runtime);
    drop(logging);
    process::exit(code);
}

fn load_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}

fn confirmation(yes: bool) -> Option<Confirmation> {
    yes.then(Confirmation::granted)
}

fn record_id(raw: &str) -> Result<RecordId> {
    RecordId::parse(raw).with_context(|| format!("invalid id `{raw}`"))
}

/// Run one command under a log scope so failures are logged once, with timing.
async fn scoped<F, T>(cmd: &'static str, collection: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T, AppError>>,
{
    let scope = LogScope::new(cmd, Some(collection));
    match fut.await {
        Ok(value) => {
            scope.success(Value::Null);
            Ok(value)
        }
        Err(err) => {
            scope.fail(&err);
            Err(err.into())
        }
    }
}

async fn handle_cli(config: AppConfig, command: Commands) -> Result<()> {
    if let Commands::Db(DbCommand::Init) = command {
        return db_init(&config).await;
    }

    let connection = config.connect().await?;
    let ctx = ViewContext::new(connection.store.clone()).with_page_size(config.page_size);

    match command {
        Commands::Students(cmd) => students(ctx, cmd).await,
        Commands::Submissions(cmd) => submissions(ctx, cmd).await,
        Commands::Dashboard { year, kelurahan } => {
            let mut view = DashboardView::new(ctx);
            scoped("dashboard", "students", view.load()).await?;
            view.set_filter(DashboardFilter { year, kelurahan });
            print_json(&json!({
                "years": view.years(),
                "recap": view.recap(),
            }))
        }
        Commands::Kelurahan(cmd) => kelurahan(ctx, cmd).await,
        Commands::Users(cmd) => {
            let mut view = UsersView::new(ctx);
            match cmd {
                UsersCommand::List => {
                    scoped("users_list", "profiles", view.load()).await?;
                    print_json(view.users())
                }
                UsersCommand::Create {
                    nama,
                    email,
                    password,
                    role,
                    kelurahan,
                } => {
                    let form = ProfileForm {
                        nama,
                        email,
                        role,
                        kelurahan_id: kelurahan,
                    };
                    let session = connection.session.clone();
                    let id = scoped(
                        "users_create",
                        "profiles",
                        view.create(&form, &password, session.as_ref()),
                    )
                    .await?;
                    print_json(&json!({ "id": id }))
                }
            }
        }
        Commands::Import { file, report_dir } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("read import file {}", file.display()))?;
            let rows: Vec<Map<String, Value>> =
                serde_json::from_str(&text).context("parse import rows")?;
            let mut view = StudentsView::new(ctx);
            scoped("students_load", "students", view.load()).await?;
            let outcome = scoped("students_import", "students", view.import(&rows)).await?;
            if let Some(summary) = outcome.error_summary() {
                eprintln!("{summary}");
            }
            if let Some(dir) = report_dir {
                let path = import::write_import_report(&dir, &file, &outcome)?;
                eprintln!("report: {}", path.display());
            }
            println!("{}", outcome.success_message());
            Ok(())
        }
        Commands::Db(_) => Ok(()),
    }
}

async fn db_init(config: &AppConfig) -> Result<()> {
    if config.backend != Backend::Sqlite {
        anyhow::bail!("db init needs the sqlite backend (set PIPADMIN_BACKEND=sqlite)");
    }
    let path = config.resolved_db_path();
    let pool = pipadmin_lib::db::open_sqlite_pool(&path)
        .await
        .with_context(|| format!("open database {}", path.display()))?;
    pool.close().await;
    print_json(&json!({ "path": path.display().to_string() }))
}

async fn students(ctx: ViewContext, cmd: StudentsCommand) -> Result<()> {
    let mut view = StudentsView::new(ctx);
    scoped("students_load", "students", view.load()).await?;
    match cmd {
        StudentsCommand::List { filter, page } => {
            view.set_filter(StudentFilter {
                nama: filter.nama,
                nama_ayah: filter.nama_ayah,
                nama_ibu: filter.nama_ibu,
                rt: filter.rt,
                rw: filter.rw,
                kelurahan_id: filter.kelurahan,
            });
            view.change_page(page);
            print_json(&json!({
                "page": view.page().current(),
                "totalPages": view.total_pages(),
                "total": view.filtered().len(),
                "rows": view.current_page(),
            }))
        }
        StudentsCommand::Add { form } => {
            let saved = scoped("students_add", "students", view.save(None, form.into())).await?;
            print_json(&saved)
        }
        StudentsCommand::Update { id, form } => {
            let id = record_id(&id)?;
            let saved =
                scoped("students_update", "students", view.save(Some(&id), form.into())).await?;
            print_json(&saved)
        }
        StudentsCommand::Delete { id, yes } => {
            let id = record_id(&id)?;
            scoped("students_delete", "students", view.delete(&id, confirmation(yes))).await
        }
    }
}

async fn submissions(ctx: ViewContext, cmd: SubmissionsCommand) -> Result<()> {
    let mut view = SubmissionsView::new(ctx);
    scoped("pengajuan_load", "pengajuan", view.load()).await?;
    match cmd {
        SubmissionsCommand::List {
            tahun,
            nama,
            kelurahan,
            page,
        } => {
            view.set_filter(SubmissionFilter {
                tahun,
                nama_siswa: nama,
                kelurahan_id: kelurahan,
                ..SubmissionFilter::default()
            });
            view.change_page(page);
            print_json(&json!({
                "page": view.page().current(),
                "totalPages": view.total_pages(),
                "total": view.filtered().len(),
                "rows": view.current_page(),
            }))
        }
        SubmissionsCommand::Add { student_id, tahun } => {
            let id = record_id(&student_id)?;
            let student = view
                .find_student(&id)
                .cloned()
                .with_context(|| format!("student {id} not found"))?;
            let created = scoped("pengajuan_add", "pengajuan", view.add(&student, &tahun)).await?;
            print_json(&created)
        }
        SubmissionsCommand::Status { id, status } => {
            let id = record_id(&id)?;
            let status: Status = status.parse()?;
            scoped("pengajuan_status", "pengajuan", view.set_status(&id, status)).await?;
            print_json(&view.find(&id))
        }
        SubmissionsCommand::Note { id, text } => {
            let id = record_id(&id)?;
            scoped("pengajuan_note", "pengajuan", view.set_deskripsi(&id, &text)).await?;
            print_json(&view.find(&id))
        }
        SubmissionsCommand::Delete { id, yes } => {
            let id = record_id(&id)?;
            scoped("pengajuan_delete", "pengajuan", view.delete(&id, confirmation(yes))).await
        }
    }
}

async fn kelurahan(ctx: ViewContext, cmd: KelurahanCommand) -> Result<()> {
    let mut view = KelurahanView::new(ctx);
    scoped("kelurahan_load", "kelurahan", view.load()).await?;
    match cmd {
        KelurahanCommand::List => print_json(view.list()),
        KelurahanCommand::Add { name } => {
            let created = scoped("kelurahan_add", "kelurahan", view.create(&name)).await?;
            print_json(&created)
        }
        KelurahanCommand::Rename { id, name } => {
            let id = record_id(&id)?;
            scoped("kelurahan_rename", "kelurahan", view.rename(&id, &name)).await
        }
        KelurahanCommand::Delete { id, yes } => {
            let id = record_id(&id)?;
            scoped("kelurahan_delete", "kelurahan", view.delete(&id, confirmation(yes))).await
        }
    }
}
