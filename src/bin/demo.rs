//! omr-demo: end-to-end demonstration menu.
//!
//! Synthesizes a bulletin board on disk, runs the detector, and decodes the
//! digest as the recipient, verifying recovered payloads against the
//! originals. Nine options, scriptable via `--demo N` or interactive when
//! run without it.

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use eyre::{bail, eyre, Result};
use rand::{seq::index::sample, thread_rng, Rng};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use omr::pvw::PvwSecretKey;
use omr::{Detector, OmrParams, Recipient, RecoveredMessage, RetrievalConfig, TransactionStore};

#[derive(Parser)]
#[command(name = "omr-demo")]
#[command(about = "Oblivious message retrieval demos")]
#[command(version)]
struct Args {
    /// Demo to run (1-9); interactive menu when omitted
    #[arg(long)]
    demo: Option<u32>,

    /// Directory for the synthesized clue and payload store
    #[arg(long, default_value = "omr_data")]
    data_dir: PathBuf,

    /// Number of transactions on the bulletin board
    #[arg(long, default_value = "65536")]
    transactions: usize,

    /// Number of pertinent messages to synthesize
    #[arg(long, default_value = "50")]
    pertinent: usize,
}

const MENU: &str = "\
+------------------------------------+
| Demos                              |
+------------------------------------+
| 1. OMD1p Detection Key Size        |
| 2. OMR2p/OMR3p Detection Key Size  |
| 3. OMD1p                           |
| 4. OMR2p Single Thread             |
| 5. OMR3p Single Thread             |
| 6. OMR2p Two Threads               |
| 7. OMR3p Two Threads               |
| 8. OMR2p Four Threads              |
| 9. OMR3p Four Threads              |
+------------------------------------+";

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    match args.demo {
        Some(selection) => dispatch(selection, &args),
        None => {
            println!("{MENU}");
            loop {
                print!("\n> Run demos (1 ~ 9) or exit (0): ");
                std::io::stdout().flush()?;
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line)? == 0 {
                    return Ok(());
                }
                match line.trim().parse::<u32>() {
                    Ok(0) => return Ok(()),
                    Ok(selection @ 1..=9) => dispatch(selection, &args)?,
                    _ => println!("  valid options: 0 ~ 9"),
                }
            }
        }
    }
}

fn dispatch(selection: u32, args: &Args) -> Result<()> {
    match selection {
        1 => report_key_size(false),
        2 => report_key_size(true),
        3 => run(Variant::Omd, 1, args),
        4 => run(Variant::Omr2, 1, args),
        5 => run(Variant::Omr3, 1, args),
        6 => run(Variant::Omr2, 2, args),
        7 => run(Variant::Omr3, 2, args),
        8 => run(Variant::Omr2, 4, args),
        9 => run(Variant::Omr3, 4, args),
        _ => bail!("valid options are 0 ~ 9"),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Variant {
    Omd,
    Omr2,
    Omr3,
}

fn report_key_size(full: bool) -> Result<()> {
    let mut rng = thread_rng();
    let params = OmrParams::recommended()?;
    let config = RetrievalConfig::recommended(65536);
    let recipient = Recipient::generate(params, config, &mut rng)?;
    let key = recipient.detection_key(&mut rng)?;

    let size = if full { key.full_size() } else { key.detection_only_size() };
    println!("Detection key size: {size} bytes");
    Ok(())
}

fn run(variant: Variant, cores: usize, args: &Args) -> Result<()> {
    let mut rng = thread_rng();
    let params = OmrParams::recommended()?;
    let mut config = RetrievalConfig::recommended(args.transactions);
    config.pertinent_bound = config.pertinent_bound.max(args.pertinent);

    let store = TransactionStore::open(&args.data_dir, params.pvw.clone(), config.payload_slots)?;
    info!(transactions = args.transactions, "synthesizing payload database");
    store.generate_database(args.transactions)?;

    let recipient = Recipient::generate(params.clone(), config.clone(), &mut rng)?;
    let expected = prepare_transactions(&store, &recipient, args)?;
    info!(pertinent = expected.len(), "synthesized clues");

    let key = recipient.detection_key(&mut rng)?;
    let detector = Detector::new(params, config, key)?;

    let detect_start = Instant::now();
    match variant {
        Variant::Omd => {
            let digest = detector.run_omd(&store, cores)?;
            info!(elapsed = ?detect_start.elapsed(), "detector finished");
            info!(bytes = digest.serialized_size(), "digest size");

            let decode_start = Instant::now();
            let indices = recipient.decode_omd(&digest)?;
            info!(elapsed = ?decode_start.elapsed(), "recipient finished");

            let expected_indices: Vec<u64> = expected.iter().map(|m| m.index).collect();
            if indices != expected_indices {
                bail!("Overflow");
            }
        }
        Variant::Omr2 | Variant::Omr3 => {
            let (digest_size, recovered) = if variant == Variant::Omr2 {
                let digest = detector.run_omr2(&store, cores)?;
                info!(elapsed = ?detect_start.elapsed(), "detector finished");
                let size = digest.serialized_size();
                let decode_start = Instant::now();
                let recovered = recipient.decode_omr2(&digest)?;
                info!(elapsed = ?decode_start.elapsed(), "recipient finished");
                (size, recovered)
            } else {
                let digest = detector.run_omr3(&store, cores, rng.gen())?;
                info!(elapsed = ?detect_start.elapsed(), "detector finished");
                let size = digest.serialized_size();
                let decode_start = Instant::now();
                let recovered = recipient.decode_omr3(&digest)?;
                info!(elapsed = ?decode_start.elapsed(), "recipient finished");
                (size, recovered)
            };
            info!(bytes = digest_size, "digest size");
            if recovered != expected {
                bail!("Overflow");
            }
        }
    }

    println!("Result is correct!");
    Ok(())
}

/// Synthesizes clues for every transaction: the chosen pertinent ones under
/// the recipient's PVW public key, the rest under throwaway secret keys.
/// Returns the expected recovery result, sorted by index.
fn prepare_transactions(
    store: &TransactionStore,
    recipient: &Recipient,
    args: &Args,
) -> Result<Vec<RecoveredMessage>> {
    let mut rng = thread_rng();
    if args.pertinent > args.transactions {
        bail!("more pertinent messages than transactions");
    }
    let mut pertinent: Vec<usize> =
        sample(&mut rng, args.transactions, args.pertinent).into_vec();
    pertinent.sort_unstable();
    println!(
        "Expected message indices: {}",
        pertinent.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" ")
    );

    let pvw_pk = recipient.pvw_public_key(&mut rng);
    let pvw_params = &recipient.params().pvw;

    let mut expected = Vec::with_capacity(pertinent.len());
    let mut next_pertinent = pertinent.iter().peekable();
    for i in 0..args.transactions {
        let clue = if next_pertinent.peek() == Some(&&i) {
            next_pertinent.next();
            expected.push(RecoveredMessage {
                index: i as u64,
                payload: store.load_payload(i)?,
            });
            pvw_pk.encrypt_zero(&mut rng)
        } else {
            PvwSecretKey::random(pvw_params, &mut rng).encrypt_zero(&mut rng)
        };
        store.save_clue(i, &clue)?;
    }
    if expected.len() != args.pertinent {
        return Err(eyre!("clue synthesis lost a pertinent index"));
    }
    Ok(expected)
}
