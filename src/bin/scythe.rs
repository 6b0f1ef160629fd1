use std::fs;
use std::io::Write;

use anyhow::{anyhow, bail, Result};
use clap::Parser as ClapParser;
use scythe::{Data, Scythe, Settings};

#[derive(clap::Parser, Debug)]
/// Render a template against JSON data.
struct Args {
    /// Template id: path below the views directory, without the
    /// .scy.html suffix.
    #[clap(required(true))]
    template: String,

    /// Views directory
    #[clap(long, default_value = "views")]
    views: String,

    /// Cache directory for compiled templates
    #[clap(long, default_value = "cache")]
    cache: String,

    /// Register a namespace, as name=path. Repeatable.
    #[clap(long)]
    namespace: Vec<String>,

    /// JSON file with the template data (a top-level object)
    #[clap(long)]
    data: Option<String>,

    /// Print the compiled form instead of rendering
    #[clap(long)]
    compile_only: bool,
}

fn read_data(path: Option<&str>) -> Result<Data> {
    let Some(path) = path else {
        return Ok(Data::new());
    };
    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow!("data file {path:?} must hold a JSON object"))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut settings = Settings::new(&args.views, &args.cache);
    for spec in &args.namespace {
        let Some((name, path)) = spec.split_once('=') else {
            bail!("--namespace takes name=path, got {spec:?}");
        };
        settings = settings.namespace(name, path);
    }
    let scythe = Scythe::new(settings)?;

    if args.compile_only {
        let source = fs::read_to_string(format!(
            "{}/{}{}",
            args.views,
            args.template,
            scythe::views::SUFFIX
        ))?;
        println!("{}", scythe.compile_string(&source)?);
        return Ok(());
    }

    let data = read_data(args.data.as_deref())?;
    let mut out = std::io::stdout().lock();
    scythe.render(&mut out, &args.template, &data)?;
    out.flush()?;
    Ok(())
}
