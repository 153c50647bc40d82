use std::collections::BTreeSet;
use std::process::ExitCode;
use std::thread;

use bdirect_io::{CaseFile, PartitionCase, load_case, load_matrix_dump, load_rhs_dump};
use bdirect_solver::{
    BlockSystem, BlockVector, Communicator, LocalComm, ResidualPair, SerialComm, SolverDriver,
    SolverError, SolverSettings,
};
use serde_json::json;
use tracing::info;

fn usage() {
    eprintln!("usage: bdirect-cli solve <case.json> [settings.json]");
    eprintln!("       bdirect-cli inspect-dump <prefix>");
}

struct PartitionOutcome {
    solution: Vec<BlockVector>,
    residuals: ResidualPair,
}

fn solve_partition<C: Communicator>(
    partition: &PartitionCase,
    comm: C,
    settings: SolverSettings,
) -> Result<PartitionOutcome, SolverError> {
    let mut system = BlockSystem::from_case(partition)?;
    let mut driver = SolverDriver::with_default_backend(&system, comm, settings)?;
    driver.full_solve(&mut system)?;
    let residuals = driver.residuals();
    driver.close()?;
    Ok(PartitionOutcome {
        solution: system.solution().to_vec(),
        residuals,
    })
}

fn solve_case(case: &CaseFile, settings: &SolverSettings) -> Result<Vec<PartitionOutcome>, String> {
    if case.partitions.len() == 1 {
        let outcome = solve_partition(&case.partitions[0], SerialComm, settings.clone())
            .map_err(|e| e.to_string())?;
        return Ok(vec![outcome]);
    }

    let comms = LocalComm::group(case.partitions.len());
    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .zip(&case.partitions)
            .map(|(comm, partition)| {
                let settings = settings.clone();
                scope.spawn(move || {
                    let rank = comm.rank();
                    solve_partition(partition, comm, settings)
                        .map_err(|e| format!("rank {rank}: {e}"))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err("rank thread panicked".to_string())))
            .collect()
    })
}

/// Solution per partition plus the residual pair, as JSON on stdout.
fn print_solution(outcomes: &[PartitionOutcome]) {
    let partitions: Vec<_> = outcomes
        .iter()
        .map(|o| {
            let solution: Vec<[f64; 2]> = o.solution.iter().map(|x| [x[0], x[1]]).collect();
            json!({ "solution": solution })
        })
        .collect();
    let ResidualPair {
        initial,
        final_residual,
    } = outcomes.first().map(|o| o.residuals).unwrap_or_default();
    let report = json!({
        "partitions": partitions,
        "initialResidual": [initial[0], initial[1]],
        "finalResidual": [final_residual[0], final_residual[1]],
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("output error: {err}"),
    }
}

fn run_solve(case_path: &str, settings_path: Option<&str>) -> ExitCode {
    let case = match load_case(case_path) {
        Ok(case) => case,
        Err(err) => {
            eprintln!("case error: {err}");
            return ExitCode::from(1);
        }
    };
    let settings = match settings_path {
        Some(path) => match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| SolverSettings::from_json_str(&text).map_err(|e| e.to_string()))
        {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("settings error: {err}");
                return ExitCode::from(1);
            }
        },
        None => SolverSettings::default(),
    };
    info!(partitions = case.partitions.len(), "solving case");

    match solve_case(&case, &settings) {
        Ok(outcomes) => {
            print_solution(&outcomes);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("solve error: {err}");
            ExitCode::from(1)
        }
    }
}

fn run_inspect(prefix: &str) -> ExitCode {
    let matrix = match load_matrix_dump(prefix) {
        Ok(matrix) => matrix,
        Err(err) => {
            eprintln!("dump error: {err}");
            return ExitCode::from(1);
        }
    };
    let distinct: BTreeSet<(usize, usize)> = matrix
        .row_indices
        .iter()
        .copied()
        .zip(matrix.col_indices.iter().copied())
        .collect();
    println!("schema_version: {}", matrix.schema_version);
    println!("created: {}", matrix.created);
    println!("n_rows: {}", matrix.n_rows);
    println!("entries: {}", matrix.nnz());
    println!("distinct_positions: {}", distinct.len());

    match load_rhs_dump(prefix) {
        Ok(rhs) => {
            let max = rhs.values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            println!("rhs_entries: {}", rhs.values.len());
            println!("rhs_max_abs: {max:.6e}");
        }
        Err(err) => println!("rhs: unavailable ({err})"),
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    match (args.get(1).map(String::as_str), args.len()) {
        (Some("solve"), 3) => run_solve(&args[2], None),
        (Some("solve"), 4) => run_solve(&args[2], Some(&args[3])),
        (Some("inspect-dump"), 3) => run_inspect(&args[2]),
        _ => {
            usage();
            ExitCode::from(2)
        }
    }
}
