use std::path::PathBuf;

use serde_json::{json, Map, Value};
use sprite_lab_core::api::server::serve;
use sprite_lab_core::config::{default_app_root, resolve_app_config};
use sprite_lab_core::pipeline::inspect::{dimensions, validate_alpha_and_size};
use sprite_lab_core::pipeline::post_ops::{PostOpRegistry, PostOpSpec};
use sprite_lab_core::pipeline::presets::PresetCatalog;
use sprite_lab_core::pipeline::templates::{render_preset, render_strict_addendum, VariableBindings};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    match cli_args.first().map(String::as_str) {
        Some("render-prompt") => return run_render_prompt_cli(&cli_args[1..]),
        Some("postprocess") => return run_postprocess_cli(&cli_args[1..]),
        Some("validate-image") => return run_validate_image_cli(&cli_args[1..]),
        _ => {}
    }

    let config = resolve_app_config(default_app_root().as_path())?;
    serve(config).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn wants_help(args: &[String]) -> bool {
    args.iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
}

fn unknown_argument(arg: &str) -> Box<dyn std::error::Error> {
    std::io::Error::other(format!("Unknown argument: {arg}\n\nUse --help for usage.")).into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RenderPromptCliArgs {
    preset_id: String,
    presets_path: Option<PathBuf>,
    vars: VariableBindings,
    strict: bool,
}

fn parse_render_prompt_cli_args(args: &[String]) -> CliResult<RenderPromptCliArgs> {
    let mut preset_id = None::<String>;
    let mut presets_path = None::<PathBuf>;
    let mut vars = VariableBindings::new();
    let mut strict = false;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--preset" => {
                preset_id = Some(needs_value(i)?);
                i += 2;
            }
            "--presets" => {
                presets_path = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--var" => {
                let raw = needs_value(i)?;
                let Some((key, value)) = raw.split_once('=') else {
                    return Err(std::io::Error::other(format!(
                        "Invalid --var '{raw}', expected KEY=VALUE"
                    ))
                    .into());
                };
                vars.insert(key.trim().to_string(), value.to_string());
                i += 2;
            }
            "--strict" => {
                strict = true;
                i += 1;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }

    let preset_id = preset_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --preset"))?;
    Ok(RenderPromptCliArgs {
        preset_id,
        presets_path,
        vars,
        strict,
    })
}

fn run_render_prompt_cli(args: &[String]) -> CliResult<()> {
    if wants_help(args) {
        print_render_prompt_usage();
        return Ok(());
    }
    let parsed = parse_render_prompt_cli_args(args)?;
    let catalog = match parsed.presets_path.as_deref() {
        Some(path) => PresetCatalog::load_from_path(path)?,
        None => PresetCatalog::builtin(),
    };
    let preset = catalog
        .get(parsed.preset_id.as_str())
        .ok_or_else(|| std::io::Error::other(format!("Preset not found: {}", parsed.preset_id)))?;

    let bindings = preset.bindings_with_defaults(&parsed.vars);
    let rendered = render_preset(preset, &bindings);
    let strict_addendum = if parsed.strict {
        Some(render_strict_addendum(preset, &bindings)?)
    } else {
        None
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "preset_id": preset.id,
            "system": rendered.system,
            "user": rendered.user,
            "prompt": rendered.compose(),
            "strict_addendum": strict_addendum,
        }))?
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct PostprocessCliArgs {
    input: PathBuf,
    output: PathBuf,
    ops: Vec<PostOpSpec>,
}

/// Parses `id` or `id:key=value,key=value`; numeric values become JSON numbers.
fn parse_op_arg(raw: &str) -> CliResult<PostOpSpec> {
    let (id, params_raw) = match raw.split_once(':') {
        Some((id, rest)) => (id.trim(), Some(rest)),
        None => (raw.trim(), None),
    };
    if id.is_empty() {
        return Err(std::io::Error::other(format!("Invalid --op '{raw}'")).into());
    }
    let mut params = Map::new();
    for pair in params_raw.into_iter().flat_map(|p| p.split(',')) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            return Err(std::io::Error::other(format!(
                "Invalid --op parameter '{pair}', expected key=value"
            ))
            .into());
        };
        let value = value.trim();
        let parsed = serde_json::from_str::<Value>(value)
            .ok()
            .filter(Value::is_number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        params.insert(key.trim().to_string(), parsed);
    }
    Ok(PostOpSpec {
        id: id.to_string(),
        params,
    })
}

fn parse_postprocess_cli_args(args: &[String]) -> CliResult<PostprocessCliArgs> {
    let mut input = None::<PathBuf>;
    let mut output = None::<PathBuf>;
    let mut ops = Vec::new();

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--input" => {
                input = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--output" => {
                output = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--op" => {
                ops.push(parse_op_arg(needs_value(i)?.as_str())?);
                i += 2;
            }
            "--ops-json" => {
                let raw = needs_value(i)?;
                ops.extend(serde_json::from_str::<Vec<PostOpSpec>>(raw.as_str())?);
                i += 2;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }

    let input = input.ok_or_else(|| std::io::Error::other("Missing required --input"))?;
    let output = output.ok_or_else(|| std::io::Error::other("Missing required --output"))?;
    Ok(PostprocessCliArgs { input, output, ops })
}

fn run_postprocess_cli(args: &[String]) -> CliResult<()> {
    if wants_help(args) {
        print_postprocess_usage();
        return Ok(());
    }
    let parsed = parse_postprocess_cli_args(args)?;
    let source = std::fs::read(parsed.input.as_path())?;
    let run = PostOpRegistry::default().run(source.as_slice(), parsed.ops.as_slice())?;
    std::fs::write(parsed.output.as_path(), run.bytes.as_slice())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "output": parsed.output.display().to_string(),
            "width": run.width,
            "height": run.height,
            "applied": run.applied,
            "skipped": run.skipped,
        }))?
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidateImageCliArgs {
    input: PathBuf,
    width: u32,
    height: u32,
    expect_alpha_border: bool,
}

fn parse_validate_image_cli_args(args: &[String]) -> CliResult<ValidateImageCliArgs> {
    let mut input = None::<PathBuf>;
    let mut width = None::<u32>;
    let mut height = None::<u32>;
    let mut expect_alpha_border = true;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--input" => {
                input = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--width" => {
                width = Some(needs_value(i)?.trim().parse::<u32>()?);
                i += 2;
            }
            "--height" => {
                height = Some(needs_value(i)?.trim().parse::<u32>()?);
                i += 2;
            }
            "--no-alpha-border" => {
                expect_alpha_border = false;
                i += 1;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }

    Ok(ValidateImageCliArgs {
        input: input.ok_or_else(|| std::io::Error::other("Missing required --input"))?,
        width: width.ok_or_else(|| std::io::Error::other("Missing required --width"))?,
        height: height.ok_or_else(|| std::io::Error::other("Missing required --height"))?,
        expect_alpha_border,
    })
}

fn run_validate_image_cli(args: &[String]) -> CliResult<()> {
    if wants_help(args) {
        print_validate_image_usage();
        return Ok(());
    }
    let parsed = parse_validate_image_cli_args(args)?;
    let bytes = std::fs::read(parsed.input.as_path())?;
    let valid = validate_alpha_and_size(
        bytes.as_slice(),
        parsed.width,
        parsed.height,
        parsed.expect_alpha_border,
    );
    let actual = dimensions(bytes.as_slice()).ok();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "valid": valid,
            "expected": {"width": parsed.width, "height": parsed.height},
            "actual": actual.map(|(w, h)| json!({"width": w, "height": h})),
            "expect_alpha_border": parsed.expect_alpha_border,
        }))?
    );
    Ok(())
}

fn print_render_prompt_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  sprite-lab-core render-prompt --preset <id> [--presets PATH] [--var KEY=VALUE]... [--strict]\n\n",
        "Unset variables fall back to the preset's first allowed value.\n",
        "--strict also renders the exact-size retry addendum.\n"
    ));
}

fn print_postprocess_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  sprite-lab-core postprocess --input PATH --output PATH [--op ID[:k=v,...]]... [--ops-json JSON]\n\n",
        "Examples:\n",
        "  --op trim --op resize:scale=4\n",
        "  --op chroma:r=0,g=255,b=0,tolerance=30\n",
        "Output is always PNG. Unknown op ids are skipped and reported.\n"
    ));
}

fn print_validate_image_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  sprite-lab-core validate-image --input PATH --width W --height H [--no-alpha-border]\n"
    ));
}
