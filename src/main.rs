use clap::Parser;
use image::ImageReader;
use std::path::PathBuf;

use gridscan::{Board, DigitClassifier, GridDetection, GridDetector, GridSegmenter};

#[derive(Parser)]
#[command(name = "gridscan")]
#[command(about = "Detect and read a digit grid from a single image")]
struct Cli {
    /// Path to input image file
    #[arg(value_name = "IMAGE")]
    image_path: PathBuf,

    /// Grid side length (4-16)
    #[arg(long, default_value_t = 9)]
    grid_size: usize,

    /// Optional digit model (.rten); without it every cell reads as empty
    #[arg(long, value_name = "MODEL")]
    model: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    if args.verbose {
        println!("Loading image: {:?}", args.image_path);
    }

    let img = ImageReader::open(&args.image_path)?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;

    if args.verbose {
        println!("Image loaded: {}x{}\n", img.width(), img.height());
    }

    let detector = GridDetector::new();
    let segmenter = GridSegmenter::new(args.grid_size)?;
    let classifier = match &args.model {
        Some(path) => DigitClassifier::with_model(path),
        None => DigitClassifier::placeholder(),
    };

    if args.verbose && !classifier.is_model_loaded() {
        println!("No digit model loaded; running in placeholder mode");
    }

    let GridDetection::Found {
        corners,
        rectified,
        confidence,
    } = detector.detect(&img)
    else {
        anyhow::bail!("No grid found in image");
    };

    println!("Grid detected (confidence {confidence:.3})");
    if args.verbose {
        for (i, p) in corners.points().iter().enumerate() {
            println!("  corner {}: ({:.0}, {:.0})", i, p.x, p.y);
        }
    }

    let cells = segmenter.segment(&rectified);
    let classifications = classifier.classify_batch(&cells);
    let board = Board::from_classifications(args.grid_size, &classifications);

    let recognized = classifications.iter().filter(|c| !c.is_empty()).count();
    println!(
        "Recognized {recognized} of {} cells:\n",
        args.grid_size * args.grid_size
    );
    print_board(&board);

    Ok(())
}

fn print_board(board: &Board) {
    for row in 0..board.size() {
        let line: Vec<String> = (0..board.size())
            .map(|col| {
                let digit = board.get(row, col);
                if digit == 0 {
                    ".".to_string()
                } else {
                    digit.to_string()
                }
            })
            .collect();
        println!("  {}", line.join(" "));
    }
}
