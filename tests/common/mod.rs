//! Shared helpers for integration tests: a scripted inference backend and
//! image encoding utilities

#![allow(dead_code)]

use bgremove_service::{
    BackgroundRemovalProcessor, BgRemovalError, InferenceBackend, PipelineConfig, ProbabilityMap,
    Result,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Response, Server};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, Array4};
use std::convert::Infallible;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a [`ScriptedBackend`] returns for every call
#[derive(Debug, Clone)]
pub enum Script {
    /// 1.0 everywhere except a single 0.0 pixel at the origin
    Foreground,
    /// Square of 1.0 at rows/cols `[offset, offset + side)` plus isolated
    /// single-pixel specks, 0.0 elsewhere
    SquareWithSpecks {
        offset: usize,
        side: usize,
        specks: Vec<(usize, usize)>,
    },
    /// Fail with this message
    Fail(String),
}

/// Inference backend returning fixed maps at the input's spatial size
#[derive(Debug)]
pub struct ScriptedBackend {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn infer(&self, input: &Array4<f32>) -> Result<ProbabilityMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_, _, height, width) = input.dim();
        let map = match &self.script {
            Script::Foreground => {
                let mut map = Array2::from_elem((height, width), 1.0_f32);
                map[[0, 0]] = 0.0;
                map
            },
            Script::SquareWithSpecks {
                offset,
                side,
                specks,
            } => {
                let mut map = Array2::zeros((height, width));
                let square = *offset..offset + side;
                for y in square.clone() {
                    for x in square.clone() {
                        map[[y, x]] = 1.0;
                    }
                }
                for &(y, x) in specks {
                    map[[y, x]] = 1.0;
                }
                map
            },
            Script::Fail(message) => return Err(BgRemovalError::inference(message.clone())),
        };
        Ok(ProbabilityMap::new(map))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Pipeline parameters with the model input shrunk to `height` x `width`
pub fn pipeline(height: usize, width: usize) -> PipelineConfig {
    PipelineConfig {
        input_height: height,
        input_width: width,
        ..PipelineConfig::default()
    }
}

pub fn processor(script: Script, pipeline: &PipelineConfig) -> Arc<BackgroundRemovalProcessor> {
    let backend = Arc::new(ScriptedBackend::new(script));
    Arc::new(BackgroundRemovalProcessor::new(backend, pipeline).expect("valid pipeline"))
}

pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode test image");
    bytes
}

pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb))),
        ImageFormat::Png,
    )
}

/// Host `body` as a 200 response on every path of a loopback server
///
/// Must be called inside a tokio runtime; the server lives until the runtime stops.
pub fn host_bytes(body: Vec<u8>) -> SocketAddr {
    let body = Arc::new(body);
    let make_svc = make_service_fn(move |_conn| {
        let body = Arc::clone(&body);
        async move {
            Ok::<_, Infallible>(service_fn(move |_req| {
                let body = Arc::clone(&body);
                async move { Ok::<_, Infallible>(Response::new(Body::from(body.as_ref().clone()))) }
            }))
        }
    });
    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}
