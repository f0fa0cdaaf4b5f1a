use bio_links::config::Config;
use bio_links::database::Db;
use bio_links::storage::DiskStore;
use bio_links::{accounts, Result};

const USAGE : &str = "usage:
    admin add-user <username> <password> [display name]
    admin delete-user <username>";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let args = args.iter().map(String::as_str).collect::<Vec<_>>();

    if let Err(err) = run(&args).await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run(args : &[&str]) -> Result<()> {
    let command = match args {
        ["add-user", username, password] => {
            Command::AddUser(username, password, "")
        },
        ["add-user", username, password, display_name] => {
            Command::AddUser(username, password, display_name)
        },
        ["delete-user", username] => Command::DeleteUser(username),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        },
    };

    let config = Config::from_env()?;
    let db = Db::new(&config.database_path)?;

    match command {
        Command::AddUser(username, password, display_name) => {
            let user = accounts::register(
                &db,
                username,
                display_name,
                password,
                password,
            )
            .await?;
            println!("added {} (id {})", user.username, user.id);
        },
        Command::DeleteUser(username) => {
            let files = DiskStore::new(&config.upload_dir)?;
            accounts::delete_user(&db, &files, username).await?;
            println!("deleted {}", username);
        },
    }

    Ok(())
}

enum Command<'a> {
    AddUser(&'a str, &'a str, &'a str),
    DeleteUser(&'a str),
}
