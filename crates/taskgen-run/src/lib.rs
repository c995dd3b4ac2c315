use anyhow::{bail, Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use taskgen_lib::description::RunSettings;
use taskgen_lib::tree::CatchWeighting;
use taskgen_lib::{BalancedDesign, Realization, RunPlan};

pub const EVENTS_FILE: &str = "event_onset_duration.tsv";
pub const MANIFEST_FILE: &str = "run.json";
pub const GAP_NAME: &str = "__iti__";

/// Optional TOML run configuration; command line flags take precedence.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct RunConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub iterations: Option<usize>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_shuffle_iterations: Option<usize>,
    #[serde(default)]
    pub catch_weighting: Option<CatchWeighting>,
}

pub fn read_config(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventRow {
    pub event: String,
    pub onset: f64,
    pub duration: f64,
    /// False for gaps and for compounds made only of `~` events.
    #[serde(skip)]
    pub timing_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunManifest {
    pub seed: u64,
    pub description: String,
    pub n_rep_branches: u64,
    pub nperms: u64,
    pub total_trials: usize,
    pub total_fillers: usize,
    pub total_duration: f64,
    pub shuffle_attempts: usize,
    pub catch_weighting: CatchWeighting,
    pub settings: RunSettings,
    pub created_unix: f64,
}

/// Directory name for a realization: its seed, zero padded to 18 digits.
pub fn seed_dir_name(seed: u64) -> String {
    format!("{:018}", seed)
}

/// One row per sub-event, onsets accumulating from `start_at`; neighbouring
/// filler collapses into a single gap row.
pub fn plan_to_rows(plan: &RunPlan, start_at: f64) -> Vec<EventRow> {
    let mut rows: Vec<EventRow> = Vec::new();
    let mut onset = start_at;
    for event in plan.trials.iter().flat_map(|t| t.events.iter()) {
        match &event.name {
            None => match rows.last_mut() {
                Some(last) if last.event == GAP_NAME => last.duration += event.duration,
                _ => rows.push(EventRow {
                    event: GAP_NAME.into(),
                    onset,
                    duration: event.duration,
                    timing_file: false,
                }),
            },
            Some(name) => rows.push(EventRow {
                event: name.clone(),
                onset,
                duration: event.duration,
                timing_file: event.timing_file,
            }),
        }
        onset += event.duration;
    }
    rows
}

/// `onset:duration` tokens per timed event name.
pub fn timing_tokens(rows: &[EventRow]) -> BTreeMap<String, Vec<String>> {
    let mut tokens: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.timing_file) {
        tokens
            .entry(row.event.clone())
            .or_default()
            .push(format!("{:.2}:{:.2}", row.onset, row.duration));
    }
    tokens
}

pub fn write_events_tsv(path: &Path, rows: &[EventRow]) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("creating events {}", path.display()))?;
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(file);
    writer.write_record(["event", "onset", "duration"])?;
    for row in rows {
        writer.write_record(&[
            row.event.clone(),
            format!("{:.3}", row.onset),
            format!("{:.3}", row.duration),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one `<event>.1D` file per timed event name into `dir`.
pub fn write_timing_files(dir: &Path, rows: &[EventRow]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (name, tokens) in timing_tokens(rows) {
        let path = dir.join(format!("{}.1D", name));
        fs::write(&path, tokens.join(" ") + "\n")
            .with_context(|| format!("writing timing file {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

pub fn write_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("creating manifest {}", path.display()))?;
    serde_json::to_writer_pretty(file, manifest)
        .with_context(|| format!("writing manifest {}", path.display()))?;
    Ok(())
}

/// Create the output root, refusing a path that already names a file.
pub fn prepare_output_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        bail!("output path {} exists and is not a directory", path.display());
    }
    fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(())
}

pub fn build_manifest(
    design: &BalancedDesign,
    realization: &Realization,
    catch_weighting: CatchWeighting,
) -> RunManifest {
    let created_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0);
    RunManifest {
        seed: realization.seed,
        description: design.text.clone(),
        n_rep_branches: design.balance.n_rep_branches,
        nperms: design.balance.nperms,
        total_trials: realization.plan.trial_count(),
        total_fillers: realization.plan.filler_count(),
        total_duration: realization.plan.total_duration(),
        shuffle_attempts: realization.shuffle_attempts,
        catch_weighting,
        settings: design.settings().clone(),
        created_unix,
    }
}

/// Write a realization's bundle under `out/<seed>/`, returning that directory.
pub fn write_realization(
    out: &Path,
    design: &BalancedDesign,
    realization: &Realization,
    catch_weighting: CatchWeighting,
) -> Result<PathBuf> {
    let dir = out.join(seed_dir_name(realization.seed));
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let rows = plan_to_rows(&realization.plan, design.settings().start_pad);
    write_events_tsv(&dir.join(EVENTS_FILE), &rows)?;
    write_timing_files(&dir, &rows)?;
    write_manifest(
        &dir.join(MANIFEST_FILE),
        &build_manifest(design, realization, catch_weighting),
    )?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgen_lib::{GeneratorOptions, SubEvent, SubEventKind, Trial};
    use tempfile::tempdir;

    fn named(name: &str, duration: f64, timing_file: bool) -> SubEvent {
        SubEvent {
            name: Some(name.into()),
            duration,
            kind: SubEventKind::Event,
            timing_file,
        }
    }

    fn sample_plan() -> RunPlan {
        RunPlan {
            trials: vec![
                Trial::filler(0.5),
                Trial::filler(0.5),
                Trial {
                    events: vec![
                        named("cue_A", 1.0, true),
                        named("end", 3.0, true),
                        SubEvent::filler(1.0),
                    ],
                },
                Trial::filler(0.5),
                Trial {
                    events: vec![named("fix", 1.0, false), named("cue_B", 1.0, true)],
                },
            ],
        }
    }

    #[test]
    fn rows_collapse_gaps_and_start_after_padding() {
        let rows = plan_to_rows(&sample_plan(), 2.0);
        let names: Vec<&str> = rows.iter().map(|r| r.event.as_str()).collect();
        assert_eq!(
            names,
            vec!["__iti__", "cue_A", "end", "__iti__", "fix", "cue_B"]
        );
        assert_eq!(rows[0].onset, 2.0);
        assert_eq!(rows[0].duration, 1.0);
        assert_eq!(rows[1].onset, 3.0);
        assert_eq!(rows[3].duration, 1.5);
        assert_eq!(rows[5].onset, 9.5);
    }

    #[test]
    fn timing_tokens_skip_gaps_and_untimed() {
        let tokens = timing_tokens(&plan_to_rows(&sample_plan(), 0.0));
        assert_eq!(tokens.keys().collect::<Vec<_>>(), vec!["cue_A", "cue_B", "end"]);
        assert_eq!(tokens["cue_A"], vec!["1.00:1.00"]);
        assert_eq!(tokens["end"], vec!["2.00:3.00"]);
    }

    #[test]
    fn writes_events_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(EVENTS_FILE);
        let rows = plan_to_rows(&sample_plan(), 0.0);
        write_events_tsv(&path, &rows).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("event\tonset\tduration\n"));
        assert!(contents.contains("cue_A\t1.000\t1.000"));
        assert!(contents.contains("__iti__\t5.000\t1.500"));
        assert_eq!(contents.lines().count(), rows.len() + 1);
    }

    #[test]
    fn reads_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(
            &path,
            "description = \"<10/1> cue=[2]\"\niterations = 3\nseed = 42\ncatch_weighting = \"complementary\"\n",
        )
        .unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.iterations, Some(3));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.catch_weighting, Some(CatchWeighting::Complementary));
        assert_eq!(config.output, None);
    }

    #[test]
    fn refuses_file_as_output_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("stims");
        fs::write(&file, "").unwrap();
        assert!(prepare_output_dir(&file).is_err());
        assert!(prepare_output_dir(&dir.path().join("fresh")).is_ok());
    }

    #[test]
    fn manifest_errors_name_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join(MANIFEST_FILE);
        let options = GeneratorOptions {
            balance_seed: Some(1),
            ..GeneratorOptions::default()
        };
        let design = BalancedDesign::from_text("<10/1> cue=[1]", &options).unwrap();
        let realization = design.realize(3, options.max_shuffle_iterations).unwrap();
        let manifest = build_manifest(&design, &realization, options.catch_weighting);
        let err = write_manifest(&path, &manifest).unwrap_err();
        assert!(err.to_string().contains("creating manifest"));
    }

    #[test]
    fn writes_a_full_bundle() {
        let dir = tempdir().unwrap();
        let options = GeneratorOptions {
            balance_seed: Some(1),
            ..GeneratorOptions::default()
        };
        let design =
            BalancedDesign::from_text("<60/6 pad:2> cue=[1](A,B); end=[3]", &options).unwrap();
        let realization = design.realize(12, options.max_shuffle_iterations).unwrap();
        let out =
            write_realization(dir.path(), &design, &realization, options.catch_weighting).unwrap();
        assert_eq!(out.file_name().unwrap(), "000000000000000012");
        for name in ["cue_A.1D", "cue_B.1D", "end.1D", EVENTS_FILE, MANIFEST_FILE] {
            assert!(out.join(name).exists(), "{} missing", name);
        }
        let end = fs::read_to_string(out.join("end.1D")).unwrap();
        assert_eq!(end.trim().split(' ').count(), 6);
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["seed"], 12);
        assert_eq!(manifest["total_trials"], 6);
        assert_eq!(manifest["n_rep_branches"], 3);
        let events = fs::read_to_string(out.join(EVENTS_FILE)).unwrap();
        let first_row: Vec<&str> = events.lines().nth(1).unwrap().split('\t').collect();
        let first_onset: f64 = first_row[1].parse().unwrap();
        assert!(first_onset >= 2.0);
    }
}
