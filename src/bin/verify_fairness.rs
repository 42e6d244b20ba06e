//! Recompute game outcomes from revealed seeds
//!
//! Prints the same values the live engines publish, so a player can check a
//! round or bet independently.

use clap::{Parser, Subcommand};
use serde::Serialize;
use wagerhub::games::session::{roll_multiplier, Dice, Limbo, RollRules};
use wagerhub::FairnessVerifier;

#[derive(Parser)]
#[command(name = "verify-fairness")]
#[command(about = "Recompute provably fair outcomes from revealed seeds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crash multiplier of a round
    Crash {
        #[arg(long)]
        server_seed: String,
        #[arg(long)]
        block_hash: String,
        /// Published multiplier to compare against
        #[arg(long)]
        expect: Option<f64>,
    },

    /// Dice roll, optionally scored against a bet
    Dice {
        #[arg(long)]
        client_seed: String,
        #[arg(long)]
        server_seed: String,
        #[arg(long)]
        target: Option<f64>,
        /// 1 for above, 0 for below
        #[arg(long, default_value = "1")]
        is_above: u8,
        /// Rake in per mille
        #[arg(long, default_value = "10")]
        rake: u32,
    },

    /// Limbo roll, optionally scored against a bet
    Limbo {
        #[arg(long)]
        client_seed: String,
        #[arg(long)]
        server_seed: String,
        #[arg(long)]
        target: Option<f64>,
        #[arg(long, default_value = "1")]
        is_above: u8,
        #[arg(long, default_value = "10")]
        rake: u32,
    },

    /// Mine layout
    Mine {
        #[arg(long)]
        client_seed: String,
        #[arg(long)]
        server_seed: String,
        #[arg(long, default_value = "3")]
        mine_count: u8,
    },
}

#[derive(Serialize)]
struct RollReport {
    server_seed_hash: String,
    result: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    won: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    multiplier: Option<f64>,
}

fn score<R: RollRules>(client_seed: &str, server_seed: &str, target: Option<f64>, is_above: u8, rake: u32) -> RollReport {
    let proof = FairnessVerifier::verify_dice(client_seed, server_seed);
    let result = R::roll(client_seed, server_seed);
    let (won, multiplier) = match target {
        Some(target) => (
            Some(R::is_win(is_above, result, target)),
            Some(roll_multiplier(rake, R::win_chance(is_above, target))),
        ),
        None => (None, None),
    };
    RollReport {
        server_seed_hash: proof.server_seed_hash,
        result,
        won,
        multiplier,
    }
}

fn print<T: Serialize>(json: bool, report: &T, text: impl FnOnce()) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        text();
    }
    Ok(())
}

fn print_roll(json: bool, game: &str, report: &RollReport) -> Result<(), Box<dyn std::error::Error>> {
    print(json, report, || {
        println!("🎲 {} verification", game);
        println!("   Server seed hash: {}", report.server_seed_hash);
        println!("   Result:           {:.2}", report.result);
        if let (Some(won), Some(multiplier)) = (report.won, report.multiplier) {
            println!("   Multiplier:       {}", multiplier);
            println!("   Outcome:          {}", if won { "✅ win" } else { "❌ lose" });
        }
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crash {
            server_seed,
            block_hash,
            expect,
        } => {
            let proof = FairnessVerifier::verify_crash(&server_seed, &block_hash);
            print(cli.json, &proof, || {
                println!("🚀 Crash verification");
                println!("   Commitment: {}", proof.commitment);
                println!("   Hash:       {}", proof.hash);
                println!("   Multiplier: {:.2}", proof.crash_multiplier);
            })?;
            if let Some(expected) = expect {
                if (expected - proof.crash_multiplier).abs() > f64::EPSILON {
                    eprintln!("❌ Published multiplier {} does not match {}", expected, proof.crash_multiplier);
                    std::process::exit(1);
                }
                if !cli.json {
                    println!("✅ Matches the published multiplier");
                }
            }
        }
        Commands::Dice {
            client_seed,
            server_seed,
            target,
            is_above,
            rake,
        } => {
            let report = score::<Dice>(&client_seed, &server_seed, target, is_above, rake);
            print_roll(cli.json, "Dice", &report)?;
        }
        Commands::Limbo {
            client_seed,
            server_seed,
            target,
            is_above,
            rake,
        } => {
            let report = score::<Limbo>(&client_seed, &server_seed, target, is_above, rake);
            print_roll(cli.json, "Limbo", &report)?;
        }
        Commands::Mine {
            client_seed,
            server_seed,
            mine_count,
        } => {
            let proof = FairnessVerifier::verify_mine(&client_seed, &server_seed, mine_count)?;
            print(cli.json, &proof, || {
                println!("💣 Mine verification");
                println!("   Server seed hash: {}", proof.server_seed_hash);
                println!("   Mines:            {:?}", proof.positions);
            })?;
        }
    }
    Ok(())
}
