use anyhow::{anyhow, Result};
use nanorand::{WyRand, RNG};
use trackmate::{api::run::RunStatus, Client};

struct Args {
    experiment: String,
    runs: u32,
    epochs: i64,
}

impl Args {
    pub fn from_env() -> Result<Self> {
        let mut args = pico_args::Arguments::from_env();
        Ok(Args {
            experiment: args
                .opt_value_from_str(["-e", "--experiment"])?
                .unwrap_or_else(|| "My Experiment".to_string()),
            runs: args.opt_value_from_str(["-r", "--runs"])?.unwrap_or(3),
            epochs: args.opt_value_from_str("--epochs")?.unwrap_or(10),
        })
    }
}

fn main() -> Result<()> {
    let args = Args::from_env()?;
    let client = Client::from_env();

    let experiment = client
        .create_experiment(&args.experiment, Some("Random search over a toy model"))
        .map_err(|e| anyhow!("Could neither get nor create the experiment: {}", e))?;
    println!(
        "Experiment {} has id {}",
        experiment.name, experiment.experiment_id
    );

    let parent = client
        .start_run(&experiment.experiment_id, Some("main_run"), false)
        .map_err(|e| anyhow!("Failed to start the main run: {}", e))?;
    client.log_param(&parent.run_id, "search", "random")?;

    let mut best = f64::NEG_INFINITY;
    for i in 0..args.runs {
        println!("Executing run {}", i);
        let run_name = format!("nested_run_{}", i);
        let run = client.start_run(&experiment.experiment_id, Some(&run_name), true)?;
        client.log_param(&run.run_id, "i", &format!("{}", i))?;
        client.log_param(&run.run_id, "constant", "42")?;

        let mut rng = WyRand::new_seed(i.into());
        let mut accuracy = 0.0;
        for step in 0..args.epochs {
            let int: f64 = rng.generate::<u16>().into();
            let max: f64 = std::u16::MAX.into();
            accuracy = int / max;
            client.log_metric_at(&run.run_id, "rand", accuracy, Some(step))?;
        }
        client.log_metric(&run.run_id, "test_accuracy_score", accuracy)?;
        best = best.max(accuracy);

        let model = format!("{{\"run\": {}, \"accuracy\": {}}}\n", i, accuracy);
        let uploaded = client.log_artifact_bytes(&run.run_id, &format!("model_{}.json", i), model.as_bytes())?;
        println!("{}", uploaded.message);
        client.end_run(&run.run_id, None)?;
    }

    client.log_metric(&parent.run_id, "best_accuracy", best)?;
    let ended = client.end_run(&parent.run_id, Some(RunStatus::Finished))?;
    let summary = client.get_run(&experiment.experiment_id, &parent.run_id)?;
    println!(
        "Run {} ended as {} with metrics {:?}",
        ended.run_id, ended.status, summary.metrics
    );
    Ok(())
}
