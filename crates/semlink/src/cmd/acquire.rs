use std::fs;
use std::path::Path;

use semlink_client::{AcquisitionRequest, Image, Roi};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{connect, AcquireArgs};
use crate::exit::{client_error, io_error, CliError, CliResult, SUCCESS};
use crate::output::{print_rows, OutputFormat};

#[derive(Serialize)]
struct SavedImage {
    channel: i32,
    width: u32,
    height: u32,
    received: usize,
    complete: bool,
    path: String,
}

pub fn run(args: AcquireArgs, format: OutputFormat) -> CliResult<i32> {
    let request = build_request(&args)?;
    fs::create_dir_all(&args.output).map_err(|err| {
        io_error(
            &format!("failed creating {}", args.output.display()),
            err,
        )
    })?;

    let client = connect::connect(&args.connection)?;
    let images = client
        .acquire_images(&request)
        .map_err(|err| client_error("acquire failed", err))?;

    let mut saved = Vec::with_capacity(images.len());
    for image in &images {
        let path = args
            .output
            .join(format!("{}-ch{}.pgm", args.prefix, image.channel));
        write_pgm(&path, image)?;
        if !image.complete {
            warn!(
                channel = image.channel,
                received = image.received,
                expected = image.data.len(),
                "image incomplete"
            );
        }
        info!(channel = image.channel, path = %path.display(), "image saved");
        saved.push(SavedImage {
            channel: image.channel,
            width: image.width,
            height: image.height,
            received: image.received,
            complete: image.complete,
            path: path.display().to_string(),
        });
    }

    let rows: Vec<Vec<String>> = saved
        .iter()
        .map(|s| {
            vec![
                s.channel.to_string(),
                s.width.to_string(),
                s.height.to_string(),
                s.received.to_string(),
                s.complete.to_string(),
                s.path.clone(),
            ]
        })
        .collect();
    print_rows(
        &saved,
        &["CHANNEL", "WIDTH", "HEIGHT", "RECEIVED", "COMPLETE", "PATH"],
        &rows,
        format,
    );

    client.disconnect();
    Ok(SUCCESS)
}

fn build_request(args: &AcquireArgs) -> CliResult<AcquisitionRequest> {
    let mut request = AcquisitionRequest::new(args.width, args.height, args.channels.clone())
        .with_dwell(args.dwell)
        .with_frames(args.frames);

    if let Some(roi) = &args.roi {
        let &[left, top, right, bottom] = roi.as_slice() else {
            return Err(CliError::usage(format!(
                "--roi needs left,top,right,bottom (got {} values)",
                roi.len()
            )));
        };
        request = request.with_roi(Roi {
            left,
            top,
            right,
            bottom,
        });
    }
    Ok(request)
}

/// Binary greyscale PGM (P5) of one 8-bit channel.
fn encode_pgm(image: &Image) -> Vec<u8> {
    let header = format!("P5\n{} {}\n255\n", image.width, image.height);
    let mut out = Vec::with_capacity(header.len() + image.data.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&image.data);
    out
}

fn write_pgm(path: &Path, image: &Image) -> CliResult<()> {
    fs::write(path, encode_pgm(image))
        .map_err(|err| io_error(&format!("failed writing {}", path.display()), err))
}
