use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use melanoma_serve::normalize;
use melanoma_serve::{
    Classifier, PredictionDetails, PredictionResponse, SavedModelClassifier, Settings, Timer,
    Verdict,
};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use structopt::StructOpt;

mod report;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "melanoma-classify",
    about = "Classify skin-lesion images locally or through the melanoma detection API"
)]
enum Command {
    /// Run the model in this process
    Local {
        #[structopt(help = "Image file path or http(s) URL")]
        image: String,

        #[structopt(
            long,
            parse(from_os_str),
            help = "SavedModel directory, defaults to the standard model locations"
        )]
        model_dir: Option<PathBuf>,
    },

    /// Upload an image to the API and show the analysis
    Upload {
        #[structopt(parse(from_os_str), help = "Image file to analyse")]
        image: PathBuf,

        #[structopt(long, help = "API base URL, defaults to $API_URL")]
        api_url: Option<String>,
    },

    /// Show a stored prediction
    Show {
        prediction_id: String,

        #[structopt(long, help = "API base URL, defaults to $API_URL")]
        api_url: Option<String>,
    },
}

#[derive(Serialize)]
struct LocalClassification {
    result: Verdict,
    confidence: f64,

    /// Time spent fetching or reading the image
    time_image_fetch: i64,

    /// Time spent decoding and resizing the image
    time_image_load: i64,

    /// Time spent running the model
    time_inference: i64,
}

fn read_image(source: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let resp = reqwest::blocking::get(source)?.error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    } else {
        Ok(fs::read(source)?)
    }
}

fn classify_local(
    settings: &Settings,
    image: &str,
    model_dir: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let candidates = match model_dir {
        Some(dir) => vec![dir],
        None => settings.model_paths.clone(),
    };
    let classifier = SavedModelClassifier::from_candidates(&candidates, settings.signature.clone())?;

    let mut t = Timer::new_start(&format!("Fetching image from {}", image));
    let data = read_image(image)?;
    let time_image_fetch = t.stop();

    let mut t = Timer::new_start("Loading image");
    let tensor = normalize::normalize(&data)?;
    let time_image_load = t.stop();

    let mut t = Timer::new_start("Inference");
    let confidence = f64::from(classifier.infer(&tensor)?);
    let time_inference = t.stop();

    let classification = LocalClassification {
        result: Verdict::from_confidence(confidence),
        confidence,
        time_image_fetch,
        time_image_load,
        time_inference,
    };

    println!("{}", serde_json::to_string(&classification)?);
    Ok(())
}

fn api_base(settings: &Settings, api_url: Option<String>) -> String {
    api_url
        .unwrap_or_else(|| settings.api_url.clone())
        .trim_end_matches('/')
        .to_string()
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Turn a non-200 answer into an error carrying its status and body.
fn expect_ok(resp: Response) -> Result<Response, Box<dyn Error>> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(format!("Analysis failed (status {}): {}", status.as_u16(), body).into())
}

fn upload(base: &str, image: &Path) -> Result<(), Box<dyn Error>> {
    let data = fs::read(image)?;
    let filename = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = content_type_for(image);
    info!("Uploading {} ({}, {} bytes)", filename, content_type, data.len());

    let part = Part::bytes(data).file_name(filename).mime_str(&content_type)?;
    let form = Form::new().part("file", part);

    let resp = Client::new()
        .post(format!("{}/predict", base))
        .multipart(form)
        .send()?;
    let prediction: PredictionResponse = expect_ok(resp)?.json()?;

    print!("{}", report::render_prediction(&prediction));
    Ok(())
}

fn show(base: &str, prediction_id: &str) -> Result<(), Box<dyn Error>> {
    let resp = Client::new()
        .get(format!("{}/predictions/{}", base, prediction_id))
        .send()?;
    let details: PredictionDetails = expect_ok(resp)?.json()?;

    print!("{}", report::render_details(&details));
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let settings = Settings::from_env();

    match Command::from_args() {
        Command::Local { image, model_dir } => classify_local(&settings, &image, model_dir),
        Command::Upload { image, api_url } => upload(&api_base(&settings, api_url), &image),
        Command::Show {
            prediction_id,
            api_url,
        } => show(&api_base(&settings, api_url), &prediction_id),
    }
}
