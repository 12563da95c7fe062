// Command line utility for calling cells in a raw feature-barcode matrix

use anyhow::{Context, Error};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use droplet_rs::cell_calling::{call_cells, BarcodeRankParams};
use droplet_rs::filter::Threshold;
use droplet_rs::mtx::{load_feature_barcode_matrix, write_feature_barcode_matrix};
use droplet_rs::rank_curve::RankCurve;
use env_logger::Builder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, LevelFilter};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn command() -> Command {
    Command::new("droplet-rs-cmd")
        .about("Separate cell barcodes from empty droplets using the barcode rank curve")
        .arg(
            Arg::new("INPUT")
                .help("raw matrix directory with matrix.mtx, barcodes.tsv and features.tsv")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PARAMS")
                .help("JSON file with barcode rank parameters")
                .long("params")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("LOWER")
                .help("Barcodes with at most this many UMIs are left off the rank curve")
                .long("lower")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("EXCLUDE_FROM")
                .help("Number of top barcodes excluded from the knee search")
                .long("exclude_from")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("THRESHOLD")
                .help("Call cells above the knee, the inflection, or a UMI count")
                .short('t')
                .long("threshold")
                .default_value("inflection")
                .value_parser(|s: &str| s.parse::<Threshold>().map_err(|e| e.to_string())),
        )
        .arg(
            Arg::new("KEEP_EMPTY_FEATURES")
                .help("Keep features without counts in the called cells")
                .long("keep_empty_features")
                .action(ArgAction::SetTrue),
        )
}

/// Parameters from the optional JSON file, overridden by command line flags.
fn load_params(matches: &ArgMatches) -> Result<BarcodeRankParams, Error> {
    let mut params = match matches.get_one::<PathBuf>("PARAMS") {
        Some(path) => {
            let file = File::open(path).with_context(|| path.display().to_string())?;
            serde_json::from_reader(BufReader::new(file)).with_context(|| path.display().to_string())?
        }
        None => BarcodeRankParams::default(),
    };
    if let Some(&lower) = matches.get_one::<f64>("LOWER") {
        params.lower = lower;
    }
    if let Some(&exclude_from) = matches.get_one::<usize>("EXCLUDE_FROM") {
        params.knee.exclude_from = exclude_from;
    }
    params.validate()?;
    Ok(params)
}

pub fn main() -> Result<(), Error> {
    Builder::new().filter_level(LevelFilter::Info).parse_default_env().init();

    let matches = command().get_matches();
    let input: &PathBuf = matches.get_one("INPUT").unwrap();
    let out_dir: &PathBuf = matches.get_one("OUT_DIR").unwrap();
    let threshold: Threshold = *matches.get_one("THRESHOLD").unwrap();
    let drop_empty_features = !matches.get_flag("KEEP_EMPTY_FEATURES");
    let params = load_params(&matches)?;

    let matrix = load_feature_barcode_matrix(input)?;
    info!(
        "loaded {} features x {} barcodes from {}",
        matrix.num_features(),
        matrix.num_barcodes(),
        input.display()
    );
    let calls = call_cells(&matrix, &params, threshold, drop_empty_features)?;

    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    write_feature_barcode_matrix(&calls.matrix, out_dir.join("filtered_feature_bc_matrix"))?;
    rank_curve_to_csv(&calls.ranks.curve, out_dir.join("barcode_ranks.csv.gz"))?;

    let summary_path = out_dir.join("summary.json");
    let file = File::create(&summary_path).with_context(|| summary_path.display().to_string())?;
    serde_json::to_writer_pretty(BufWriter::new(file), &calls.summary)?;

    Ok(())
}

pub fn rank_curve_to_csv(curve: &RankCurve, path: impl AsRef<Path>) -> Result<(), Error> {
    let mut writer = BufWriter::new(GzEncoder::new(File::create(path)?, Compression::default()));
    writeln!(writer, "rank,total,num_barcodes")?;
    for entry in curve.entries() {
        writeln!(writer, "{},{},{}", entry.rank, entry.total, entry.num_barcodes)?;
    }
    writer.into_inner().map_err(|e| e.into_error())?.finish()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use droplet_rs::rank_curve::compute_rank_curve;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn matches(args: &[&str]) -> ArgMatches {
        command().get_matches_from(std::iter::once("droplet-rs-cmd").chain(args.iter().copied()))
    }

    #[test]
    fn test_threshold_arg() {
        let m = matches(&["raw"]);
        assert_eq!(m.get_one::<Threshold>("THRESHOLD"), Some(&Threshold::Inflection));
        assert!(!m.get_flag("KEEP_EMPTY_FEATURES"));

        let m = matches(&["raw", "-t", "knee", "--keep_empty_features"]);
        assert_eq!(m.get_one::<Threshold>("THRESHOLD"), Some(&Threshold::Knee));
        assert!(m.get_flag("KEEP_EMPTY_FEATURES"));

        let m = matches(&["raw", "--threshold", "150"]);
        assert_eq!(m.get_one::<Threshold>("THRESHOLD"), Some(&Threshold::Custom(150.0)));

        assert!(command()
            .try_get_matches_from(["droplet-rs-cmd", "raw", "-t", "elbow"])
            .is_err());
    }

    #[test]
    fn test_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"lower": 5.0, "knee": {"exclude_from": 20, "bandwidth": 0.2}}"#).unwrap();
        let path = path.to_str().unwrap();

        let params = load_params(&matches(&["raw", "--params", path])).unwrap();
        assert_eq!(params.lower, 5.0);
        assert_eq!(params.knee.exclude_from, 20);
        assert_eq!(params.knee.bandwidth, 0.2);
        assert_eq!(params.knee.min_distinct, 3);

        let params = load_params(&matches(&["raw", "--params", path, "--exclude_from", "100", "--lower", "0"])).unwrap();
        assert_eq!(params.lower, 0.0);
        assert_eq!(params.knee.exclude_from, 100);

        assert_eq!(load_params(&matches(&["raw"])).unwrap(), BarcodeRankParams::default());

        std::fs::write(dir.path().join("bad.json"), r#"{"knee": {"grid_step": -1.0}}"#).unwrap();
        let bad = dir.path().join("bad.json");
        assert!(load_params(&matches(&["raw", "--params", bad.to_str().unwrap()])).is_err());
    }

    #[test]
    fn test_rank_curve_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("barcode_ranks.csv.gz");
        rank_curve_to_csv(&compute_rank_curve(&[10, 10, 5, 1, 0], 0.0), &path).unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap()).read_to_string(&mut text).unwrap();
        assert_eq!(text, "rank,total,num_barcodes\n1,10,2\n3,5,1\n4,1,1\n");
    }
}
