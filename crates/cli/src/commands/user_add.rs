use chrono::Utc;
use clap::Args;
use uuid::Uuid;

use crate::commands::{connect, load_config, runtime, CommandResult, StepFailure};
use assetdesk_core::domain::user::{Role, User, UserId};
use assetdesk_db::migrations;
use assetdesk_db::repositories::{SqlUserRepository, UserRepository};

#[derive(Debug, Args)]
pub struct UserAddArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long = "full-name")]
    pub full_name: String,
    #[arg(long)]
    pub email: String,
    #[arg(long, help = "MD, Admin, Accounts/SCM, Concern Manager, or User")]
    pub role: String,
    #[arg(long, help = "Floor the user works on; required for Concern Managers")]
    pub floor: Option<String>,
    #[arg(long)]
    pub department: Option<String>,
}

pub fn run(args: &UserAddArgs) -> CommandResult {
    let user = match build_user(args) {
        Ok(user) => user,
        Err(message) => return CommandResult::failure("user-add", "invalid_input", message, 5),
    };
    let config = match load_config("user-add") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("user-add") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let users = SqlUserRepository::new(pool.clone());
        let existing = users
            .find_by_username(&user.username)
            .await
            .map_err(|error| ("db_query", error.to_string(), 4u8))?;
        if existing.is_some() {
            pool.close().await;
            return Err::<(), StepFailure>((
                "duplicate_user",
                format!("username `{}` is already taken", user.username),
                5u8,
            ));
        }

        users
            .save(user.clone())
            .await
            .map_err(|error| ("user_insert", error.to_string(), 5u8))?;
        pool.close().await;
        Ok(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "user-add",
            format!("created user {} ({}) with role {}", user.id, user.username, user.role),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("user-add", error_class, message, exit_code)
        }
    }
}

fn build_user(args: &UserAddArgs) -> Result<User, String> {
    let username = required("username", &args.username)?;
    let full_name = required("full-name", &args.full_name)?;
    let email = required("email", &args.email)?;
    if !email.contains('@') {
        return Err(format!("email `{email}` is not a valid address"));
    }

    let role = Role::parse(&args.role);
    if let Role::Other(raw) = &role {
        return Err(format!(
            "unknown role `{raw}`; expected MD, Admin, Accounts/SCM, Concern Manager, or User"
        ));
    }

    let floor = optional(args.floor.as_deref());
    if role == Role::ConcernManager && floor.is_none() {
        return Err("Concern Manager users need a --floor".to_string());
    }

    Ok(User {
        id: UserId(format!("u-{}", Uuid::new_v4().simple())),
        username,
        full_name,
        email,
        role,
        floor,
        department: optional(args.department.as_deref()),
        is_active: true,
        created_at: Utc::now(),
    })
}

fn required(field: &str, value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("--{field} must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(ToString::to_string)
}
