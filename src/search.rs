// Montage search
//
// One combination at a time: synthesize the TI field from the shared
// leadfield, attach it to a copy of the base mesh and write it. Failures are
// recorded per combination and never stop the loop. With `parallel` the
// loop runs on the rayon pool and outcomes are put back in ordinal order.

use crate::combination::{generate_combinations, Combination};
use crate::config::SearchConfig;
use crate::context::RunContext;
use crate::leadfield::{Leadfield, LeadfieldVariant};
use crate::synthesis::{FieldSynthesizer, Intensity};
use crate::writer::{MeshResultWriter, ViewDescriptor};
use crate::Result;
use rayon::prelude::*;
use std::path::PathBuf;

/// A combination that produced no mesh, and why
#[derive(Debug, Clone, PartialEq)]
pub struct CombinationFailure {
    pub combination: Combination,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CombinationOutcome {
    Written(PathBuf),
    /// Result mesh already on disk from an earlier run
    Skipped(PathBuf),
    Failed(CombinationFailure),
}

/// Per-combination outcomes of one leadfield variant, in ordinal order
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub variant: LeadfieldVariant,
    pub outcomes: Vec<CombinationOutcome>,
}

impl SearchReport {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, CombinationOutcome::Written(_))).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, CombinationOutcome::Skipped(_))).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CombinationFailure> {
        self.outcomes.iter().filter_map(|o| match o {
            CombinationOutcome::Failed(failure) => Some(failure),
            _ => None,
        })
    }
}

/// Options of a single search pass
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub intensity: Intensity,
    pub parallel: bool,
    pub skip_existing: bool,
}

fn process_one(
    leadfield: &Leadfield,
    synthesizer: &FieldSynthesizer,
    writer: &MeshResultWriter,
    combination: &Combination,
    options: &SearchOptions,
) -> CombinationOutcome {
    let variant = leadfield.variant();
    let target = writer.path_for(variant, combination);
    // a result counts as done only with its view descriptor
    if options.skip_existing && target.exists() && ViewDescriptor::path_for(&target).exists() {
        return CombinationOutcome::Skipped(target);
    }

    let result = synthesizer
        .synthesize(leadfield, combination, options.intensity)
        .map_err(|e| e.to_string())
        .and_then(|field| {
            writer
                .write(leadfield.mesh(), variant, combination, field)
                .map_err(|e| e.to_string())
        });

    match result {
        Ok(path) => CombinationOutcome::Written(path),
        Err(reason) => CombinationOutcome::Failed(CombinationFailure { combination: combination.clone(), reason }),
    }
}

fn log_outcome(total: usize, combination: &Combination, outcome: &CombinationOutcome) {
    let n = combination.index + 1;
    match outcome {
        CombinationOutcome::Written(path) => {
            log::info!("{:03}/{} Saved {}", n, total, path.display());
        }
        CombinationOutcome::Skipped(path) => {
            log::info!("{:03}/{} Exists, skipping {}", n, total, path.display());
        }
        CombinationOutcome::Failed(failure) => {
            log::warn!("{:03}/{} Failed {}: {}", n, total, failure.combination, failure.reason);
        }
    }
}

/// Run every combination against one loaded leadfield
pub fn run_search(
    leadfield: &Leadfield,
    combinations: &[Combination],
    writer: &MeshResultWriter,
    options: SearchOptions,
) -> SearchReport {
    let total = combinations.len();
    let synthesizer = FieldSynthesizer::new(leadfield);

    log::info!(
        "Running {} combinations on the {} leadfield at {} mV",
        total,
        leadfield.variant(),
        options.intensity.millivolts()
    );

    let run = |combination: &Combination| {
        let outcome = process_one(leadfield, &synthesizer, writer, combination, &options);
        log_outcome(total, combination, &outcome);
        (combination.index, outcome)
    };

    let mut indexed: Vec<(usize, CombinationOutcome)> = if options.parallel {
        combinations.par_iter().map(run).collect()
    } else {
        combinations.iter().map(run).collect()
    };
    indexed.sort_by_key(|(index, _)| *index);

    let report = SearchReport {
        variant: leadfield.variant(),
        outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
    };
    log::info!(
        "{} leadfield: {} written, {} skipped, {} failed",
        report.variant,
        report.written(),
        report.skipped(),
        report.failures().count()
    );
    report
}

/// Full search for a subject: validate the config, then load each requested
/// leadfield in turn and run all combinations against it. A leadfield that
/// cannot be loaded aborts the run.
pub fn run(context: &RunContext, config: &SearchConfig) -> Result<Vec<SearchReport>> {
    let sets = config.validate()?;
    let combinations = generate_combinations(
        &sets.e1_plus,
        &sets.e1_minus,
        &sets.e2_plus,
        &sets.e2_minus,
        config.duplicate_policy,
    );
    log::info!("Generated {} electrode combinations", combinations.len());

    let output_dir = context.output_dir();
    std::fs::create_dir_all(&output_dir)?;
    let writer = MeshResultWriter::new(output_dir);

    let options = SearchOptions {
        intensity: config.intensity(),
        parallel: config.parallel,
        skip_existing: config.skip_existing,
    };

    let mut reports = Vec::with_capacity(config.variants.len());
    for &variant in &config.variants {
        let leadfield = Leadfield::load(context.leadfield_path(variant))?;
        reports.push(run_search(&leadfield, &combinations, &writer, options));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrode::{ElectrodePair, ElectrodeSet, LabelFormat};
    use crate::combination::DuplicatePolicy;
    use crate::leadfield::tests::volume_leadfield;
    use crate::mesh::FieldMesh;

    fn set(name: &str, labels: &[&str]) -> ElectrodeSet {
        ElectrodeSet::new(name, labels.iter().copied(), &LabelFormat::default()).unwrap()
    }

    fn combinations() -> Vec<Combination> {
        generate_combinations(
            &set("E1+", &["E002"]),
            &set("E1-", &["E001"]),
            &set("E2+", &["E003", "E999"]),
            &set("E2-", &["E004"]),
            DuplicatePolicy::Keep,
        )
    }

    fn options(parallel: bool, skip_existing: bool) -> SearchOptions {
        SearchOptions { intensity: Intensity::from_millivolts(50.0), parallel, skip_existing }
    }

    #[test]
    fn test_failure_does_not_stop_loop() {
        let dir = tempfile::tempdir().unwrap();
        let lf = volume_leadfield();
        let writer = MeshResultWriter::new(dir.path());

        let report = run_search(&lf, &combinations(), &writer, options(false, false));

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.written(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].combination.second, ElectrodePair::new("E999", "E004"));
        assert!(failures[0].reason.contains("E999"));

        let written = dir.path().join("TI_field_E002_E001_and_E003_E004.msh");
        assert_eq!(report.outcomes[0], CombinationOutcome::Written(written.clone()));
        let mesh = FieldMesh::load(&written).unwrap();
        assert_eq!(mesh.element_fields["TImax"].len(), 3);
        // the shared base mesh is untouched
        assert!(lf.mesh().element_fields.is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let seq_dir = tempfile::tempdir().unwrap();
        let par_dir = tempfile::tempdir().unwrap();
        let lf = volume_leadfield();

        let seq = run_search(&lf, &combinations(), &MeshResultWriter::new(seq_dir.path()), options(false, false));
        let par = run_search(&lf, &combinations(), &MeshResultWriter::new(par_dir.path()), options(true, false));

        assert_eq!(seq.written(), par.written());
        let name = "TI_field_E002_E001_and_E003_E004.msh";
        let a = FieldMesh::load(seq_dir.path().join(name)).unwrap();
        let b = FieldMesh::load(par_dir.path().join(name)).unwrap();
        assert_eq!(a.element_fields, b.element_fields);
    }

    #[test]
    fn test_skip_existing() {
        let dir = tempfile::tempdir().unwrap();
        let lf = volume_leadfield();
        let writer = MeshResultWriter::new(dir.path());

        run_search(&lf, &combinations(), &writer, options(false, false));
        let again = run_search(&lf, &combinations(), &writer, options(false, true));

        assert_eq!(again.skipped(), 1);
        assert_eq!(again.written(), 0);
        assert_eq!(again.failures().count(), 1);
    }

    #[test]
    fn test_skip_existing_rewrites_incomplete_result() {
        let dir = tempfile::tempdir().unwrap();
        let lf = volume_leadfield();
        let writer = MeshResultWriter::new(dir.path());

        run_search(&lf, &combinations(), &writer, options(false, false));
        let mesh = dir.path().join("TI_field_E002_E001_and_E003_E004.msh");
        let view = ViewDescriptor::path_for(&mesh);
        std::fs::remove_file(&view).unwrap();

        let again = run_search(&lf, &combinations(), &writer, options(false, true));
        assert_eq!(again.skipped(), 0);
        assert_eq!(again.written(), 1);
        assert!(view.exists());
    }

    #[test]
    fn test_missing_leadfield_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let context = RunContext::new(dir.path(), "sub01", "EGI_template").unwrap();
        let config = SearchConfig::new("E002", "E001", "E003", "E004");

        let err = run(&context, &config).unwrap_err();
        assert!(matches!(err, crate::Error::Leadfield(_)));
    }
}
