//! Streams frames from the first camera found on the network until Ctrl-C.
//!
//! Run with `RUST_LOG=debug` to see the configuration readout and per-frame
//! diagnostics.

use std::path::PathBuf;
use std::process;
use std::{env, fs};

use gige_cam::{
    first_available_device, AcquisitionController, AcquisitionOptions, CancelToken,
};
use log::error;

fn usage() -> ! {
    eprintln!(
        "usage: acquire [options]\n\
         \n\
         options:\n\
         \x20 -w, --width N               requested image width\n\
         \x20 -h, --height N              requested image height\n\
         \x20     --binning-horizontal N  requested horizontal binning\n\
         \x20     --binning-vertical N    requested vertical binning\n\
         \x20 -s, --snapshot FILE         write the first frame's raw bytes to FILE\n\
         \x20 -a, --auto-socket-buffer    size the receive socket buffer automatically\n\
         \x20     --buffer-count N        number of buffers in the pool\n\
         \x20     --help                  show this help"
    );
    process::exit(2);
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> String {
    match args.next() {
        Some(value) => value,
        None => {
            eprintln!("missing value for {}", flag);
            usage();
        }
    }
}

fn next_i64(args: &mut impl Iterator<Item = String>, flag: &str) -> i64 {
    let value = next_value(args, flag);
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            eprintln!("invalid value {:?} for {}", value, flag);
            usage();
        }
    }
}

fn main() {
    env_logger::init();

    let mut options = AcquisitionOptions::new();
    let mut snapshot_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-w" | "--width" => options = options.with_width(next_i64(&mut args, &arg)),
            "-h" | "--height" => options = options.with_height(next_i64(&mut args, &arg)),
            "--binning-horizontal" => {
                options = options.with_binning_horizontal(next_i64(&mut args, &arg))
            }
            "--binning-vertical" => {
                options = options.with_binning_vertical(next_i64(&mut args, &arg))
            }
            "-s" | "--snapshot" => {
                snapshot_path = Some(PathBuf::from(next_value(&mut args, &arg)));
                options = options.with_snapshot(true);
            }
            "-a" | "--auto-socket-buffer" => options = options.with_auto_socket_buffer(true),
            "--buffer-count" => {
                options = options.with_buffer_count(next_i64(&mut args, &arg).max(1) as usize)
            }
            "--help" => usage(),
            other => {
                eprintln!("unknown option {:?}", other);
                usage();
            }
        }
    }

    let device = match first_available_device() {
        Ok(Some(device)) => device,
        Ok(None) => {
            println!("No device found");
            return;
        }
        Err(err) => {
            error!("discovery failed: {}", err);
            process::exit(1);
        }
    };
    println!("Using {}", device.info());

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        error!("failed to install Ctrl-C handler: {}", err);
        process::exit(1);
    }

    let mut controller = AcquisitionController::new(device, options);
    if let Some(path) = snapshot_path {
        controller = controller.with_snapshot_handler(move |buffer| {
            match fs::write(&path, buffer.data()) {
                Ok(()) => println!(
                    "snapshot ({} x {}) written to {}",
                    buffer.width(),
                    buffer.height(),
                    path.display()
                ),
                Err(err) => eprintln!("failed to write snapshot: {}", err),
            }
        });
    }

    if let Err(err) = controller.run(&cancel) {
        error!("acquisition failed: {}", err);
        process::exit(1);
    }
}
