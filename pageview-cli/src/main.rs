use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use pageview_core::{
    Annotation, CacheEvent, DisplayMode, Rgb, Selection, Viewer, ViewerCommand, ViewerConfig,
};
use pageview_render::PdfiumProvider;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pageview",
    version,
    about = "Windowed PDF page viewer with highlights and display modes"
)]
struct Args {
    /// Viewer config (TOML); defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    viewport: ViewportArgs,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, clap::Args)]
struct ViewportArgs {
    /// Viewport width in pixels
    #[arg(long, global = true, default_value_t = 1200.0)]
    width: f32,

    /// Viewport height in pixels
    #[arg(long, global = true, default_value_t = 1600.0)]
    height: f32,

    /// Zoom steps relative to fit-to-width; negative zooms out
    #[arg(long, global = true, default_value_t = 0, allow_hyphen_values = true)]
    zoom: i32,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Write the pages visible at a position as PNG files
    Render {
        file: PathBuf,

        /// Page to scroll to (0-based)
        #[arg(short = 'p', long = "page")]
        page: Option<usize>,

        /// Output directory
        #[arg(short = 'o', long = "out", default_value = ".")]
        out: PathBuf,

        /// Display mode: default, night or eye-care
        #[arg(long, value_parser = parse_display_mode)]
        mode: Option<DisplayMode>,

        /// Annotation file to paint onto the pages
        #[arg(long)]
        annotations: Option<PathBuf>,
    },
    /// Print the text under a pixel rectangle of a page
    Extract {
        file: PathBuf,

        /// Page the rectangle lies on (0-based)
        page: usize,

        /// Rectangle in page raster pixels: x0,y0,x1,y1
        #[arg(long, value_parser = parse_pixel_rect)]
        rect: PixelRect,
    },
    /// Highlight a pixel rectangle of a page and save it to an annotation file
    Annotate {
        file: PathBuf,

        /// Page the rectangle lies on (0-based)
        page: usize,

        /// Rectangle in page raster pixels: x0,y0,x1,y1
        #[arg(long, value_parser = parse_pixel_rect)]
        rect: PixelRect,

        /// Annotation file to extend (created when missing)
        #[arg(long)]
        annotations: PathBuf,

        /// Highlight color as #rrggbb; defaults to the configured color
        #[arg(long, value_parser = parse_color)]
        color: Option<Rgb>,

        /// Note attached to the highlight
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PixelRect {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl PixelRect {
    fn selection(self, page: usize) -> Selection {
        Selection::from_drag(page, (self.x0, self.y0), (self.x1, self.y1))
    }
}

/// On-disk annotation set for one document, keyed by page index.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct AnnotationFile {
    pages: BTreeMap<usize, Vec<Annotation>>,
}

impl AnnotationFile {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {:?}", path))
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("failed to write {:?}", path))
    }

    fn import_into(self, viewer: &mut Viewer) -> Result<()> {
        for (page, annotations) in self.pages {
            viewer.import_annotations(page, annotations)?;
        }
        Ok(())
    }

    fn export_from(viewer: &Viewer) -> Self {
        Self {
            pages: viewer.cache().export_annotations(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pageview", "pageview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load_or_default(&config_path)?;
    let provider = PdfiumProvider::new()?;

    match args.command {
        CliCommand::Render {
            file,
            page,
            out,
            mode,
            annotations,
        } => {
            let mut viewer = open_viewer(&provider, config, &args.viewport, &file).await?;
            if let Some(path) = annotations {
                AnnotationFile::load(&path)?.import_into(&mut viewer)?;
            }
            if let Some(mode) = mode {
                viewer.apply(ViewerCommand::SetDisplayMode(mode))?;
            }
            if let Some(page) = page {
                viewer.apply(ViewerCommand::GotoPage { page })?;
            }
            report_failures(&viewer);
            render_visible(&viewer, &out)?;
        }
        CliCommand::Extract { file, page, rect } => {
            let mut viewer = open_viewer(&provider, config, &args.viewport, &file).await?;
            viewer.apply(ViewerCommand::GotoPage { page })?;
            let text = viewer.extract_text(&rect.selection(page))?;
            println!("{text}");
        }
        CliCommand::Annotate {
            file,
            page,
            rect,
            annotations,
            color,
            note,
        } => {
            let color = color.unwrap_or(config.highlight_color);
            let mut viewer = open_viewer(&provider, config, &args.viewport, &file).await?;
            AnnotationFile::load(&annotations)?.import_into(&mut viewer)?;
            viewer.apply(ViewerCommand::GotoPage { page })?;
            match viewer.request_annotation(&rect.selection(page), color, note)? {
                Some(id) => {
                    AnnotationFile::export_from(&viewer).save(&annotations)?;
                    println!("{id}");
                }
                None => warn!(page, "selection produced no highlight"),
            }
        }
    }

    Ok(())
}

async fn open_viewer(
    provider: &PdfiumProvider,
    config: ViewerConfig,
    viewport: &ViewportArgs,
    file: &Path,
) -> Result<Viewer> {
    let mut viewer = Viewer::new(config);
    viewer.apply(ViewerCommand::Resize {
        width: viewport.width,
        height: viewport.height,
    })?;
    viewer
        .open_with(provider, file)
        .await
        .with_context(|| format!("failed to open {:?}", file))?;
    for _ in 0..viewport.zoom.unsigned_abs() {
        let command = if viewport.zoom > 0 {
            ViewerCommand::ZoomIn { anchor: None }
        } else {
            ViewerCommand::ZoomOut { anchor: None }
        };
        viewer.apply(command)?;
    }
    Ok(viewer)
}

fn report_failures(viewer: &Viewer) {
    for event in viewer.drain_events() {
        if let CacheEvent::PageFailed { page, message } = event {
            warn!(page, %message, "page failed to render");
        }
    }
}

fn render_visible(viewer: &Viewer, out: &Path) -> Result<()> {
    let Some(range) = viewer.controller().visible_range() else {
        bail!("document has no pages");
    };
    fs::create_dir_all(out).with_context(|| format!("failed to create {:?}", out))?;
    for page in range {
        let Some(raster) = viewer.composited(page)? else {
            warn!(page, "page is not available, skipping");
            continue;
        };
        let image = image::RgbImage::from_raw(raster.width, raster.height, raster.pixels)
            .ok_or_else(|| anyhow!("page {} raster has an unexpected size", page))?;
        let path = out.join(format!("page-{:04}.png", page + 1));
        image
            .save(&path)
            .with_context(|| format!("failed to write {:?}", path))?;
        info!(page, path = %path.display(), "wrote page");
        println!("{}", path.display());
    }
    Ok(())
}

fn parse_display_mode(value: &str) -> Result<DisplayMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "default" => Ok(DisplayMode::Default),
        "night" | "night-inverted" => Ok(DisplayMode::NightInverted),
        "eye-care" | "eyecare" => Ok(DisplayMode::EyeCare),
        other => Err(format!("unknown display mode {other:?}")),
    }
}

fn parse_pixel_rect(value: &str) -> Result<PixelRect, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid rectangle {value:?}: {err}"))?;
    match parts.as_slice() {
        [x0, y0, x1, y1] => Ok(PixelRect {
            x0: *x0,
            y0: *y0,
            x1: *x1,
            y1: *y1,
        }),
        _ => Err(format!("expected x0,y0,x1,y1, got {value:?}")),
    }
}

fn parse_color(value: &str) -> Result<Rgb, String> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(format!("expected #rrggbb, got {value:?}"));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|err| format!("invalid color {value:?}: {err}"))
    };
    Ok(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pageview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries command output
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageview_core::{Rect, Region};

    #[test]
    fn parses_pixel_rectangles() {
        assert_eq!(
            parse_pixel_rect("10, 20,30.5,40").unwrap(),
            PixelRect {
                x0: 10.0,
                y0: 20.0,
                x1: 30.5,
                y1: 40.0
            }
        );
        assert!(parse_pixel_rect("1,2,3").is_err());
        assert!(parse_pixel_rect("a,b,c,d").is_err());
    }

    #[test]
    fn reversed_rectangles_become_normalised_selections() {
        let rect = parse_pixel_rect("30,40,10,20").unwrap();
        let selection = rect.selection(2);
        assert_eq!(selection.page, 2);
        assert_eq!(selection.rect, Rect::new(10.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn parses_colors_and_modes() {
        assert_eq!(parse_color("#ff8000").unwrap(), Rgb(255, 128, 0));
        assert_eq!(parse_color("00ff00").unwrap(), Rgb(0, 255, 0));
        assert!(parse_color("#fff").is_err());
        assert_eq!(parse_display_mode("Night").unwrap(), DisplayMode::NightInverted);
        assert_eq!(parse_display_mode("eye-care").unwrap(), DisplayMode::EyeCare);
        assert!(parse_display_mode("sepia").is_err());
    }

    #[test]
    fn annotation_file_survives_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notes.json");
        assert_eq!(AnnotationFile::load(&path).unwrap(), AnnotationFile::default());

        let mut file = AnnotationFile::default();
        file.pages.insert(
            3,
            vec![Annotation::new(
                Region::RawRect(Rect::new(1.0, 2.0, 3.0, 4.0)),
                Rgb::YELLOW,
                Some("check".into()),
            )],
        );
        file.save(&path).unwrap();
        assert_eq!(AnnotationFile::load(&path).unwrap(), file);
    }

    #[test]
    fn cli_arguments_parse() {
        let args = Args::try_parse_from([
            "pageview",
            "--zoom",
            "-2",
            "annotate",
            "doc.pdf",
            "1",
            "--rect",
            "0,0,50,50",
            "--annotations",
            "notes.json",
            "--color",
            "#112233",
        ])
        .unwrap();
        assert_eq!(args.viewport.zoom, -2);
        match args.command {
            CliCommand::Annotate { page, color, .. } => {
                assert_eq!(page, 1);
                assert_eq!(color, Some(Rgb(17, 34, 51)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
