//! Demo CLI: reads a JSON action manifest, builds a plan from it, and
//! executes that plan through the fork/wait scheduler. Exists to give
//! the library a runnable entry point and a shape for the test suite's
//! end-to-end scenarios; an embedding application would supply its own
//! `DependencyOracle`/`Performer` instead of this one.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

use kiln::core::action::{Component, ComponentPath};
use kiln::core::plan::{DependencyOracle, PlanBuilder};
use kiln::exec::pool::{Performer, PreforkGc};
use kiln::exec::scheduler::Scheduler;
use kiln::ops::StdOp;
use kiln::shell::Shell;
use kiln::{breadcrumbs, config, Operation, Recorder, RecordingPerformer};

#[derive(Parser, Debug)]
#[command(name = "kiln", about = "Run an action manifest through the scheduler")]
struct Cli {
    /// Path to the JSON action manifest.
    manifest: PathBuf,

    /// Path to a `kiln.toml` config file.
    #[arg(long, default_value = "kiln.toml")]
    config: PathBuf,

    /// Overrides the configured worker cap.
    #[arg(long)]
    max_forks: Option<usize>,

    /// Record the exact action sequence this run performs.
    #[arg(long)]
    breadcrumbs_to: Option<PathBuf>,

    /// Replay a previously recorded action sequence instead of
    /// building a plan from the manifest's dependency graph.
    #[arg(long)]
    using_breadcrumbs_from: Option<PathBuf>,

    /// Suppress the "Will"/"Done" progress lines.
    #[arg(long)]
    quiet: bool,
}

/// One entry per `<op_tag>:<component_path>` action named anywhere in
/// the manifest, keyed exactly that way.
#[derive(Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    already_done: bool,
    #[serde(default)]
    fail: Option<String>,
}

#[derive(Deserialize)]
struct Manifest {
    root: String,
    actions: HashMap<String, ManifestEntry>,
}

fn parse_action_id(id: &str) -> anyhow::Result<(StdOp, ComponentPath)> {
    let (tag, path) = id
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("action id {id:?} is missing a `<op>:<path>` separator"))?;
    let op = StdOp::from_tag(tag).ok_or_else(|| anyhow::anyhow!("unknown operation tag {tag:?}"))?;
    Ok((op, ComponentPath::new(path.split('/'))))
}

#[derive(Clone, Debug)]
struct DemoComponent {
    path: ComponentPath,
}

impl Component for DemoComponent {
    fn path(&self) -> ComponentPath {
        self.path.clone()
    }
}

struct ManifestOracle<'m> {
    manifest: &'m Manifest,
}

impl<'m> ManifestOracle<'m> {
    fn entry(&self, op: &StdOp, path: &ComponentPath) -> anyhow::Result<&ManifestEntry> {
        let id = format!("{}:{}", op.tag(), path);
        self.manifest
            .actions
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("manifest has no entry for action {id:?}"))
    }
}

impl<'m> DependencyOracle<StdOp, DemoComponent> for ManifestOracle<'m> {
    fn prerequisites(
        &self,
        op: &StdOp,
        component: &DemoComponent,
    ) -> anyhow::Result<Vec<(StdOp, DemoComponent)>> {
        let entry = self.entry(op, &component.path)?;
        entry
            .deps
            .iter()
            .map(|id| {
                let (op, path) = parse_action_id(id)?;
                Ok((op, DemoComponent { path }))
            })
            .collect()
    }

    fn needed_in_image(&self, op: &StdOp, _component: &DemoComponent) -> bool {
        op.needed_in_image()
    }

    fn already_done(&self, op: &StdOp, component: &DemoComponent) -> bool {
        self.entry(op, &component.path)
            .map(|entry| entry.already_done)
            .unwrap_or(false)
    }
}

struct ManifestResolver<'m> {
    manifest: &'m Manifest,
}

impl<'m> breadcrumbs::ComponentResolver<DemoComponent> for ManifestResolver<'m> {
    fn resolve(&self, path: &ComponentPath) -> anyhow::Result<DemoComponent> {
        let has_entry = self
            .manifest
            .actions
            .keys()
            .any(|id| id.ends_with(&format!(":{path}")));
        if !has_entry {
            anyhow::bail!("no manifest entry mentions component {path}");
        }
        Ok(DemoComponent { path: path.clone() })
    }
}

struct ManifestPerformer<'m> {
    manifest: &'m Manifest,
}

impl<'m> Performer<StdOp, DemoComponent> for ManifestPerformer<'m> {
    fn perform(
        &self,
        op: &StdOp,
        component: &DemoComponent,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let id = format!("{}:{}", op.tag(), component.path);
        let entry = self
            .manifest
            .actions
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("manifest has no entry for action {id:?}"))?;
        if let Some(reason) = &entry.fail {
            anyhow::bail!(reason.clone());
        }
        Ok(Some(serde_json::json!({ "action": id })))
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    cfg.apply_overrides(&config::ConfigOverrides {
        max_forks: cli.max_forks,
        prefork_allocation_reserve_ratio: None,
        breadcrumbs_to: cli.breadcrumbs_to.clone(),
        using_breadcrumbs_from: cli.using_breadcrumbs_from.clone(),
    });

    let manifest_text = std::fs::read_to_string(&cli.manifest)
        .with_context(|| format!("reading manifest {}", cli.manifest.display()))?;
    let manifest: Manifest = serde_json::from_str(&manifest_text)
        .with_context(|| format!("parsing manifest {}", cli.manifest.display()))?;

    let (root_op, root_path) = parse_action_id(&manifest.root)?;
    let root_component = DemoComponent { path: root_path };

    let result_dir = tempfile::tempdir().context("creating result-file scratch directory")?;

    let plan = if let Some(from) = &cfg.using_breadcrumbs_from {
        let resolver = ManifestResolver {
            manifest: &manifest,
        };
        breadcrumbs::replay_plan::<StdOp, DemoComponent, _>(from, &resolver, result_dir.path())
            .with_context(|| format!("replaying breadcrumbs from {}", from.display()))?
    } else {
        let oracle = ManifestOracle {
            manifest: &manifest,
        };
        PlanBuilder::new(&oracle, result_dir.path())
            .build(root_op, root_component)
            .context("building plan")?
    };

    run(plan, &manifest, &cfg, &cli)
}

fn run(
    plan: kiln::Plan<StdOp, DemoComponent>,
    manifest: &Manifest,
    cfg: &config::Config,
    cli: &Cli,
) -> anyhow::Result<()> {
    let shell = Shell::new(cli.quiet);
    let performer = ManifestPerformer { manifest };
    let gc = PreforkGc {
        reserve_ratio: cfg.prefork_allocation_reserve_ratio,
        heap_usage_ratio: Box::new(|| 0.0),
        collect: Box::new(|| {}),
    };

    let summary = if let Some(to) = &cfg.breadcrumbs_to {
        let recorder = Recorder::create(to)
            .with_context(|| format!("opening breadcrumb log {}", to.display()))?;
        let recording = RecordingPerformer::new(performer, recorder);
        Scheduler::new(plan, &recording, &shell, cfg.max_forks, gc).execute()
    } else {
        Scheduler::new(plan, &performer, &shell, cfg.max_forks, gc).execute()
    };

    match summary {
        Ok(summary) => {
            if !cli.quiet {
                println!("completed {} action(s)", summary.completed);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
