use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::*;
use ratatui::symbols::Marker;
use ratatui::widgets::canvas::{Canvas, Line as CanvasLine};
use ratatui::widgets::{Block, Paragraph};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use carto_morph::cartogram::CartogramInput;
use carto_morph::delimited::{RecordTokenizer, Rfc4180};
use carto_morph::easing::Easing;
use carto_morph::engine::{BoxFuture, DataLoader, DataSource, MorphConfig, MorphEngine};
use carto_morph::enrich::{AggregationSpec, Statistic};
use carto_morph::error::LoadError;
use carto_morph::geometry::{Extent, FeatureCollection, Row};
use carto_morph::projection::{Identity, Projection, TransverseMercator, WebMercator};

type BoxResult<T> = Result<T, Box<dyn Error>>;
type Term = Terminal<CrosstermBackend<Stdout>>;

const STEP: f64 = 0.05;

/// Step through or animate a regular-to-cartogram morph in the terminal.
#[derive(Debug, Parser)]
#[command(name = "carto-morph", version)]
struct Args {
    /// Regular geography (GeoJSON FeatureCollection).
    regular: PathBuf,

    /// Cartogram: GeoJSON, a JSON grid-record array, or a delimited grid file.
    cartogram: PathBuf,

    /// Tabular data joined onto both geographies (CSV or JSON array).
    #[arg(long)]
    data: Option<PathBuf>,

    #[arg(long, default_value = "code")]
    join_column: String,

    #[arg(long, default_value = "code")]
    join_property: String,

    /// `column=statistic`, e.g. `population=sum`. Repeatable.
    #[arg(long = "aggregate", value_parser = parse_aggregate)]
    aggregates: Vec<(String, String)>,

    #[arg(long)]
    normalize: bool,

    #[arg(long)]
    primary_metric: Option<String>,

    #[arg(long, value_enum, default_value_t = ProjectionArg::Identity)]
    projection: ProjectionArg,

    #[arg(long, default_value_t = 32)]
    utm_zone: u8,

    #[arg(long)]
    southern: bool,

    #[arg(long)]
    max_segment_length: Option<f64>,

    #[arg(long, default_value_t = 1500)]
    duration_ms: u64,

    #[arg(long, default_value_t = 60)]
    fps: u32,

    #[arg(long, default_value = "ease-in-out")]
    easing: Easing,

    /// Print the interpolated collection at this factor as GeoJSON and exit.
    #[arg(long)]
    dump: Option<f64>,

    #[arg(long, default_value = "carto-morph.log")]
    log_file: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProjectionArg {
    Identity,
    WebMercator,
    Utm,
    BritishNationalGrid,
}

fn parse_aggregate(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(col, stat)| (col.trim().to_string(), stat.trim().to_string()))
        .filter(|(col, stat)| !col.is_empty() && !stat.is_empty())
        .ok_or_else(|| format!("expected `column=statistic`, got `{s}`"))
}

fn main() -> BoxResult<()> {
    let args = Args::parse();
    init_tracing(&args.log_file)?;

    let mut engine = build_engine(&args)?;
    pollster::block_on(engine.prepare())?;

    if let Some(factor) = args.dump {
        let collection = engine.interpolated_collection(factor)?;
        println!("{}", serde_json::to_string_pretty(&collection)?);
        return Ok(());
    }

    enable_raw_mode()?;
    crossterm::execute!(io::stdout(), EnterAlternateScreen)?;

    let result = run(&engine, &args);

    disable_raw_mode()?;
    crossterm::execute!(io::stdout(), LeaveAlternateScreen)?;

    result
}

fn init_tracing(path: &Path) -> BoxResult<()> {
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}

fn build_engine(args: &Args) -> BoxResult<MorphEngine> {
    let regular: FeatureCollection = serde_json::from_str(&fs::read_to_string(&args.regular)?)?;
    let cartogram = read_cartogram(&args.cartogram)?;

    let aggregation = args
        .aggregates
        .iter()
        .fold(AggregationSpec::new(), |spec, (col, stat)| {
            spec.with(col.as_str(), Statistic::from(stat.as_str()))
        });

    let data = match &args.data {
        Some(path) => DataSource::Loader(file_loader(path.clone())),
        None => DataSource::None,
    };

    let config = MorphConfig {
        join_column: args.join_column.clone(),
        join_property: args.join_property.clone(),
        aggregation,
        normalize: args.normalize,
        primary_metric: args.primary_metric.clone(),
        max_segment_length: args.max_segment_length,
        ..MorphConfig::default()
    };

    let projection: Arc<dyn Projection> = match args.projection {
        ProjectionArg::Identity => Arc::new(Identity),
        ProjectionArg::WebMercator => Arc::new(WebMercator),
        ProjectionArg::Utm => Arc::new(TransverseMercator::utm(args.utm_zone, !args.southern)),
        ProjectionArg::BritishNationalGrid => Arc::new(TransverseMercator::british_national_grid()),
    };

    info!(regular = %args.regular.display(), cartogram = %args.cartogram.display(), "inputs read");

    Ok(MorphEngine::new(regular, cartogram, data, projection, config)?)
}

fn is_delimited(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("csv" | "tsv" | "txt")
    )
}

fn read_cartogram(path: &Path) -> BoxResult<CartogramInput> {
    let text = fs::read_to_string(path)?;

    if is_delimited(path) {
        return Ok(CartogramInput::DelimitedText(text));
    }

    Ok(CartogramInput::sniff(serde_json::from_str(&text)?)?)
}

fn file_loader(path: PathBuf) -> DataLoader {
    Box::new(move || -> BoxFuture<Result<Vec<Row>, LoadError>> {
        let path = path.clone();

        Box::pin(async move {
            let text = fs::read_to_string(&path)?;

            let rows: Vec<Row> = if is_delimited(&path) {
                Rfc4180::default().tokenize(&text)?
            } else {
                match serde_json::from_str::<Value>(&text)? {
                    Value::Array(items) => items
                        .into_iter()
                        .filter_map(|v| match v {
                            Value::Object(row) => Some(row),
                            other => {
                                warn!(value = %other, "skipping non-object data row");
                                None
                            }
                        })
                        .collect(),
                    _ => return Err(format!("{} is not a JSON array", path.display()).into()),
                }
            };

            Ok::<_, LoadError>(rows)
        })
    })
}

struct View {
    bounds: Extent,
    regions: usize,
}

impl View {
    fn new(engine: &MorphEngine) -> BoxResult<Self> {
        let corners = [engine.regular_collection()?, engine.cartogram_collection()?]
            .iter()
            .filter_map(FeatureCollection::extent)
            .flat_map(|e| [[e.min_x, e.min_y], [e.max_x, e.max_y]])
            .collect::<Vec<_>>();

        let bounds = Extent::of_coords(corners).ok_or("geographies have no finite coordinates")?;
        let pad = bounds.width().max(bounds.height()) * 0.02;

        Ok(Self {
            bounds: Extent {
                min_x: bounds.min_x - pad,
                min_y: bounds.min_y - pad,
                max_x: bounds.max_x + pad,
                max_y: bounds.max_y + pad,
            },
            regions: engine.region_ids()?.len(),
        })
    }
}

fn run(engine: &MorphEngine, args: &Args) -> BoxResult<()> {
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    let view = View::new(engine)?;
    let mut factor = 0.0;

    draw(&mut terminal, &view, engine, factor)?;

    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }

            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,

                KeyCode::Right => factor = (factor + STEP).min(1.0),

                KeyCode::Left => factor = (factor - STEP).max(0.0),

                KeyCode::Home => factor = 0.0,

                KeyCode::End => factor = 1.0,

                KeyCode::Char(' ') | KeyCode::Enter => {
                    let target = if factor < 0.5 { 1.0 } else { 0.0 };
                    run_transition(&mut terminal, &view, engine, args, factor, target)?;
                    factor = target;
                }

                _ => continue,
            }

            draw(&mut terminal, &view, engine, factor)?;
        }
    }

    Ok(())
}

fn run_transition(
    terminal: &mut Term,
    view: &View,
    engine: &MorphEngine,
    args: &Args,
    from: f64,
    to: f64,
) -> BoxResult<()> {
    let duration = Duration::from_millis(args.duration_ms.max(1));
    let frame_interval = Duration::from_secs(1) / args.fps.max(1);
    let start = Instant::now();

    loop {
        let elapsed = start.elapsed();
        let raw_t = (elapsed.as_secs_f64() / duration.as_secs_f64()).min(1.0);
        let t = args.easing.apply(raw_t);

        draw(terminal, view, engine, from + (to - from) * t)?;

        if raw_t >= 1.0 {
            break;
        }

        let ticks = (elapsed.as_secs_f64() / frame_interval.as_secs_f64()).ceil() as u32;
        let next_tick = start + frame_interval * ticks;
        let now = Instant::now();

        if next_tick > now {
            std::thread::sleep(next_tick - now);
        }
    }

    Ok(())
}

const PALETTE: [Color; 6] = [
    Color::Rgb(255, 80, 80),
    Color::Rgb(80, 120, 255),
    Color::Rgb(80, 255, 80),
    Color::Rgb(255, 200, 80),
    Color::Rgb(200, 80, 255),
    Color::Rgb(80, 220, 220),
];

fn draw(terminal: &mut Term, view: &View, engine: &MorphEngine, factor: f64) -> BoxResult<()> {
    let frame = engine.interpolated_collection(factor)?;
    let bounds = view.bounds;
    let status = format!(
        "carto-morph  t={factor:.2}  {}/{} regions  [←/→ step] [space animate] [home/end] [q quit]",
        frame.len(),
        view.regions,
    );

    terminal.draw(|f| {
        let chunks = Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).split(f.area());

        f.render_widget(
            Paragraph::new(status).style(Style::new().fg(Color::DarkGray)),
            chunks[0],
        );

        let canvas = Canvas::default()
            .block(Block::bordered())
            .marker(Marker::Braille)
            .x_bounds([bounds.min_x, bounds.max_x])
            .y_bounds([bounds.min_y, bounds.max_y])
            .paint(|ctx| {
                for (i, feature) in frame.features.iter().enumerate() {
                    let color = PALETTE[i % PALETTE.len()];

                    for ring in feature.geometry.outer_rings() {
                        for edge in ring.windows(2) {
                            ctx.draw(&CanvasLine {
                                x1: edge[0][0],
                                y1: edge[0][1],
                                x2: edge[1][0],
                                y2: edge[1][1],
                                color,
                            });
                        }
                    }
                }
            });

        f.render_widget(canvas, chunks[1]);
    })?;

    Ok(())
}
