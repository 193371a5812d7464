use at_tuner::Tuner;
use at_types::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Two matrix sizes, one blocking factor to tune
    let problem = Problem::new(
        "blocked_gemm",
        Space::new().add_integer("n", 512, 4096),
        Space::new().add_integer("block", 8, 256),
        |task, params| {
            let ideal = 16.0 + task[0] / 64.0;
            1.0 + ((params[0] - ideal) / 64.0).powi(2)
        },
    )
    .with_constraint(|task, params| params.map_or(true, |p| p[0] <= task[0] / 8.0));

    let options = TuningOptions::default()
        .with_execution(ExecutionMode::SharedMemory)
        .with_threads(4)
        .with_restarts(4)
        .with_seed(42);
    println!("Options: {}", serde_json::to_string_pretty(&options)?);

    let mut tuner = Tuner::new(problem, options)?;
    let (data, model) = tuner.run(12, Some(2), None)?;

    for (i, task) in data.tasks().iter().enumerate() {
        if let Some((params, value)) = data.best(i) {
            println!("n = {:>5}: best block = {:>4} -> {:.4}", task[0], params[0], value);
        }
    }

    let prediction = model.predict(&[0.5], 0)?;
    println!(
        "Surrogate at mid-range block for task 0: mean {:.4}, variance {:.2e}",
        prediction.mean, prediction.variance
    );

    let status = tuner.status();
    println!(
        "Run {} finished in {:?}: {} rounds, {} samples",
        status.id,
        status.elapsed(),
        status.rounds_completed,
        status.samples_evaluated
    );

    Ok(())
}
