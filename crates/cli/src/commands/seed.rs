use std::path::Path;

use concierge_db::{SeedDataset, SeedResult, SqlPropertyRepository, SqlReservationRepository};

use crate::commands::{current_thread_runtime, load_config, migrated_pool, CommandResult};

pub fn run(fixtures: &Path) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let dataset = match SeedDataset::load(fixtures) {
        Ok(dataset) => dataset,
        Err(error) => return CommandResult::failure("seed", "fixture_invalid", error.to_string(), 6),
    };

    let runtime = match current_thread_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let properties = SqlPropertyRepository::new(pool.clone());
        let reservations = SqlReservationRepository::new(pool.clone());
        let applied = dataset
            .apply(&properties, &reservations)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));
        pool.close().await;
        applied
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded, fixtures)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult, fixtures: &Path) -> String {
    format!(
        "seeded {} properties and {} reservations from {}",
        seeded.properties,
        seeded.reservations,
        fixtures.display()
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use concierge_db::SeedResult;

    use super::summary;

    #[test]
    fn summary_names_counts_and_source() {
        let seeded = SeedResult { properties: 2, reservations: 3 };
        assert_eq!(
            summary(&seeded, Path::new("demos/guest_records.json")),
            "seeded 2 properties and 3 reservations from demos/guest_records.json"
        );
    }
}
