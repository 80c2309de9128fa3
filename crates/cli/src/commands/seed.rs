use crate::commands::{connect, load_config, runtime, CommandResult, StepFailure};
use assetdesk_db::{migrations, DemoSeedDataset, RequestSeedInfo};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config).await?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<SeedOutput, StepFailure> = if verification.all_present {
            Ok(SeedOutput {
                users: seed_result.users_seeded,
                requests: seed_result.requests_seeded,
            })
        } else {
            Err(("seed_verification", verification_message(&verification.failed_checks()), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => {
            let request_lines: Vec<String> = output
                .requests
                .iter()
                .map(|request| {
                    format!(
                        "  - {} by {}: {}",
                        request.request_id, request.owner_id, request.description
                    )
                })
                .collect();
            let message = format!(
                "demo dataset loaded: {} users, {} pending requests:\n{}",
                output.users,
                output.requests.len(),
                request_lines.join("\n")
            );
            CommandResult::success("seed", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

struct SeedOutput {
    users: usize,
    requests: Vec<RequestSeedInfo>,
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
