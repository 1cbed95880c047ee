use crate::error::CliError;
use chrono::Utc;
use model::{
    migration::{MigrationContext, MigrationSnapshot},
    transfer::TransferReportSnapshot,
};
use serde::Serialize;

#[derive(Serialize)]
struct StatusJson<'a> {
    migration: &'a MigrationSnapshot,
    context: &'a MigrationContext,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_status(
    migration: &MigrationSnapshot,
    context: &MigrationContext,
    as_json: bool,
) -> Result<(), CliError> {
    if as_json {
        return print_json(&StatusJson { migration, context });
    }

    println!("Migration {}:", migration.id);
    println!("-----------------------------");
    println!("{:<20} {}", "Stage", migration.stage);
    println!(
        "{:<20} {}",
        "Last error",
        migration.last_error.as_deref().unwrap_or("none")
    );
    println!("{:<20} {}", "Updated", migration.updated_at.to_rfc3339());

    let fields = [
        ("Application stack", &context.application_deployment_id),
        ("Helper stack", &context.helper_stack_deployment_id),
        ("Bucket", &context.migration_bucket),
        ("Migration host", &context.migration_host_instance_id),
    ];
    for (label, value) in fields {
        println!("{:<20} {}", label, value.as_deref().unwrap_or("n/a"));
    }
    Ok(())
}

pub fn print_report(report: &TransferReportSnapshot, as_json: bool) -> Result<(), CliError> {
    if as_json {
        return print_json(report);
    }

    println!("Transfer {}:", report.status);
    println!("-----------------------------");
    println!("{:<12} {}", "Found", report.found);
    println!("{:<12} {}", "Commenced", report.commenced);
    println!("{:<12} {}", "Completed", report.completed);
    println!("{:<12} {}", "Failed", report.failed.len());
    if let Some(elapsed) = report.elapsed(Utc::now()) {
        println!("{:<12} {:.1}s", "Elapsed", elapsed.as_secs_f64());
    }

    for failure in &report.failed {
        println!("  {}: {}", failure.path.display(), failure.reason);
    }
    Ok(())
}
