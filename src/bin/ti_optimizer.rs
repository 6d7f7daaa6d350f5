// Command-line entry point for the TI montage optimizer

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use ti_optimizer::aggregate::{self, Aggregator};
use ti_optimizer::config::ElectrodeList;
use ti_optimizer::projection::BatchProjection;
use ti_optimizer::region::{self, Region};
use ti_optimizer::sampler::{SamplerConfig, SubprocessSampler};
use ti_optimizer::writer::{DIRECTIONAL_FIELD, MAX_ENVELOPE_FIELD};
use ti_optimizer::{
    search, DuplicatePolicy, FieldMesh, LabelFormat, LeadfieldVariant, Point3D, ReferenceImage, Result, RunContext,
    SearchConfig,
};

#[derive(Parser)]
#[command(author, version, about = "Temporal-interference electrode montage search")]
struct Cli {
    /// Project root, overrides PROJECT_DIR
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Subject name, overrides SUBJECT_NAME
    #[arg(long, global = true)]
    subject: Option<String>,

    /// EEG cap of the leadfield, overrides EEG_CAP
    #[arg(long, global = true)]
    eeg_cap: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate every electrode combination and write one result mesh each
    Search(SearchArgs),

    /// Project result meshes onto the subject's reference voxel grid
    Project(ProjectArgs),

    /// Sample result meshes at every region and build the region matrix
    Aggregate(AggregateArgs),

    /// Manage region-of-interest files
    #[command(subcommand)]
    Roi(RoiCommand),

    /// List the node and element fields of a mesh file
    Info {
        mesh: PathBuf,
    },

    /// Keep only elements with the given tags
    Crop(CropArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantChoice {
    Vol,
    Gm,
    Both,
}

impl VariantChoice {
    fn variants(self) -> Vec<LeadfieldVariant> {
        match self {
            VariantChoice::Vol => vec![LeadfieldVariant::Volume],
            VariantChoice::Gm => vec![LeadfieldVariant::Surface],
            VariantChoice::Both => vec![LeadfieldVariant::Surface, LeadfieldVariant::Volume],
        }
    }
}

#[derive(Args)]
struct SearchArgs {
    /// JSON search configuration; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Electrodes for channel 1 anode, e.g. "E076, E077"
    #[arg(long, required_unless_present = "config")]
    e1_plus: Option<String>,

    #[arg(long, required_unless_present = "config")]
    e1_minus: Option<String>,

    #[arg(long, required_unless_present = "config")]
    e2_plus: Option<String>,

    #[arg(long, required_unless_present = "config")]
    e2_minus: Option<String>,

    /// Stimulation intensity in mV
    #[arg(long)]
    intensity: Option<f64>,

    #[arg(long, value_enum)]
    leadfield: Option<VariantChoice>,

    /// Evaluate combinations on all cores
    #[arg(long)]
    parallel: bool,

    /// Keep result meshes that already exist
    #[arg(long)]
    skip_existing: bool,

    /// Skip montages that only swap the two channels
    #[arg(long)]
    skip_mirrored: bool,
}

impl SearchArgs {
    fn to_config(&self) -> Result<SearchConfig> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::load(path)?,
            None => SearchConfig::new("", "", "", ""),
        };

        let lists = [
            (&self.e1_plus, &mut config.e1_plus),
            (&self.e1_minus, &mut config.e1_minus),
            (&self.e2_plus, &mut config.e2_plus),
            (&self.e2_minus, &mut config.e2_minus),
        ];
        for (flag, list) in lists {
            if let Some(text) = flag {
                *list = ElectrodeList::from(text.as_str());
            }
        }

        if let Some(mv) = self.intensity {
            config.intensity_mv = mv;
        }
        if let Some(choice) = self.leadfield {
            config.variants = choice.variants();
        }
        config.parallel |= self.parallel;
        config.skip_existing |= self.skip_existing;
        if self.skip_mirrored {
            config.duplicate_policy = DuplicatePolicy::SkipMirrored;
        }
        Ok(config)
    }
}

#[derive(Args)]
struct ProjectArgs {
    /// Directory of result meshes, defaults to the subject's output directory
    #[arg(long)]
    input: Option<PathBuf>,

    /// Defaults to the `niftis` directory under the output directory
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "TI_norm_field")]
    prefix: String,

    #[arg(long, default_value = DIRECTIONAL_FIELD)]
    field: String,

    /// Reference image header, defaults to the subject's T1
    #[arg(long)]
    reference: Option<PathBuf>,
}

#[derive(Args)]
struct AggregateArgs {
    /// Directory of result meshes, defaults to the subject's output directory
    #[arg(long)]
    mesh_dir: Option<PathBuf>,

    /// Text file listing region files, defaults to ROIs/roi_list.txt
    #[arg(long)]
    roi_list: Option<PathBuf>,

    /// Only meshes starting with this are sampled (TI_norm_field for surface results)
    #[arg(long, default_value = "TI_field")]
    prefix: String,

    /// Rebuild the matrix from mesh_data.json without sampling
    #[arg(long)]
    from_checkpoint: bool,

    #[arg(long, default_value = "get_fields_at_coordinates")]
    sampler: String,

    #[arg(long, default_value = "linear")]
    method: String,

    /// Field named in the sampler's output files
    #[arg(long, default_value = MAX_ENVELOPE_FIELD)]
    field: String,

    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    #[arg(long, default_value_t = 1)]
    retries: usize,
}

#[derive(Subcommand)]
enum RoiCommand {
    /// Write ROIs/<name>.csv and add it to the region list
    Create {
        /// Single word, no spaces
        name: String,

        /// x y z in world coordinates
        #[arg(num_args = 3, allow_negative_numbers = true, value_names = ["X", "Y", "Z"])]
        coordinates: Vec<f64>,
    },

    /// Show region files and the current region list
    List,
}

#[derive(Args)]
struct CropArgs {
    mesh: PathBuf,

    #[arg(long, value_delimiter = ',', default_value = "2")]
    tags: Vec<i32>,

    /// Defaults to grey_<name> next to the input
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    if let Err(e) = try_main() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Search(args) => run_search(&cli, args),
        Command::Project(args) => run_project(&cli, args),
        Command::Aggregate(args) => run_aggregate(&cli, args),
        Command::Roi(command) => run_roi(&cli, command),
        Command::Info { mesh } => run_info(mesh),
        Command::Crop(args) => run_crop(args),
    }
}

fn context(cli: &Cli) -> Result<RunContext> {
    Ok(RunContext::from_env_with(cli.project_dir.clone(), cli.subject.clone(), cli.eeg_cap.clone())?)
}

fn run_search(cli: &Cli, args: &SearchArgs) -> Result<()> {
    let context = context(cli)?;
    let config = args.to_config()?;
    log::info!("Subject {} ({} cap)", context.subject_name, context.eeg_cap);

    let reports = search::run(&context, &config)?;
    let written: usize = reports.iter().map(|r| r.written()).sum();
    let skipped: usize = reports.iter().map(|r| r.skipped()).sum();
    let failed: usize = reports.iter().map(|r| r.failures().count()).sum();
    log::info!("Done: {} meshes written, {} skipped, {} failed", written, skipped, failed);
    Ok(())
}

fn run_project(cli: &Cli, args: &ProjectArgs) -> Result<()> {
    let context = context(cli)?;
    let reference_path = args.reference.clone().unwrap_or_else(|| context.reference_image());
    let reference = ReferenceImage::load(&reference_path)?;

    let batch = BatchProjection {
        input_dir: args.input.clone().unwrap_or_else(|| context.output_dir()),
        output_dir: args.output.clone().unwrap_or_else(|| context.volume_dir()),
        prefix: args.prefix.clone(),
        field: args.field.clone(),
    };
    let report = batch.run(&reference)?;
    log::info!("Done: {} volumes written, {} meshes failed", report.written.len(), report.failed.len());
    Ok(())
}

/// Region files from the list; relative entries are resolved against the
/// ROIs directory
fn load_regions(list: &Path, regions_dir: &Path) -> Result<Vec<Region>> {
    let mut regions = Vec::new();
    for path in region::read_region_list(list)? {
        let path = if path.is_absolute() { path } else { regions_dir.join(path) };
        regions.push(Region::load(&path)?);
    }
    Ok(regions)
}

fn run_aggregate(cli: &Cli, args: &AggregateArgs) -> Result<()> {
    let context = context(cli)?;
    let out_dir = context.output_dir();
    std::fs::create_dir_all(&out_dir)?;

    let list = args.roi_list.clone().unwrap_or_else(|| context.region_list());
    let regions = load_regions(&list, &context.regions_dir())?;
    let names: Vec<String> = regions.iter().map(|r| r.name.clone()).collect();
    log::info!("{} regions: {}", regions.len(), names.join(", "));

    let format = LabelFormat::default();
    let samples = if args.from_checkpoint {
        aggregate::load_checkpoint(&context.checkpoint_path())?
    } else {
        let sampler = SubprocessSampler::new(SamplerConfig {
            program: args.sampler.clone(),
            method: args.method.clone(),
            field: args.field.clone(),
            timeout: Duration::from_secs(args.timeout_secs),
            retries: args.retries,
            ..SamplerConfig::default()
        });
        let mesh_dir = args.mesh_dir.clone().unwrap_or_else(|| out_dir.clone());
        Aggregator::new(&sampler)
            .with_prefix(args.prefix.as_str())
            .with_label_format(format.clone())
            .run(&mesh_dir, &regions)?
            .samples
    };

    aggregate::finish(&samples, &names, &format, &out_dir)?;
    Ok(())
}

fn run_roi(cli: &Cli, command: &RoiCommand) -> Result<()> {
    let context = context(cli)?;
    let regions_dir = context.regions_dir();
    let list = context.region_list();

    match command {
        RoiCommand::Create { name, coordinates } => {
            let point = Point3D::new(coordinates[0], coordinates[1], coordinates[2]);
            let path = region::save_region(&regions_dir, name, &[point])?;
            log::info!("Region {} written to {}", name, path.display());

            let mut entries = if list.exists() { region::read_region_list(&list)? } else { Vec::new() };
            if !entries.contains(&path) {
                entries.push(path);
                region::write_region_list(&list, &entries)?;
            }
        }
        RoiCommand::List => {
            let names = region::list_regions(&regions_dir)?;
            if names.is_empty() {
                println!("No regions in {}", regions_dir.display());
            }
            for name in names {
                println!("{}", name);
            }
            if list.exists() {
                println!("Selected ({}):", list.display());
                for path in region::read_region_list(&list)? {
                    println!("  {}", path.display());
                }
            }
        }
    }
    Ok(())
}

fn run_info(path: &Path) -> Result<()> {
    let mesh = FieldMesh::load(path)?;
    let (node_fields, element_fields) = mesh.field_names();
    println!("{}: {} nodes, {} elements", path.display(), mesh.num_nodes(), mesh.num_elements());
    let (min, max) = mesh.bounds();
    println!("Bounds: ({:.2}, {:.2}, {:.2}) to ({:.2}, {:.2}, {:.2})", min.x, min.y, min.z, max.x, max.y, max.z);
    println!("Node fields: {}", node_fields.join(", "));
    println!("Element fields: {}", element_fields.join(", "));
    Ok(())
}

fn run_crop(args: &CropArgs) -> Result<()> {
    let mesh = FieldMesh::load(&args.mesh)?;
    let cropped = mesh.crop_to_tags(&args.tags)?;

    let output = args.output.clone().unwrap_or_else(|| {
        let name = args.mesh.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        args.mesh.with_file_name(format!("grey_{}", name))
    });
    cropped.save(&output)?;
    log::info!(
        "Kept {} of {} elements (tags {:?}), saved to {}",
        cropped.num_elements(),
        mesh.num_elements(),
        args.tags,
        output.display()
    );
    Ok(())
}
