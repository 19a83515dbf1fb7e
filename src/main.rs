// Entry point for the bmcore developer CLI
use bitmessage_core::core::{stamp_object, BmObject, ObjectType, PowCancel};
use bitmessage_core::storage::{RecordStore, SledStore, Storage};
use bitmessage_core::utils::{current_time, describe_duration, random_bytes};
use bitmessage_core::wallet::{
    calculate_double_hash_of_address_data, calculate_message_tags_between, decode_address,
    AddressGenerator,
};
use bitmessage_core::{Command, Config, Opt, OutputFormat};
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use serde_json::json;
use std::process;
use std::time::Instant;

fn main() {
    // Info level shows POW progress without per-object noise
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn print_value(format: OutputFormat, value: serde_json::Value, text: &str) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Text => println!("{text}"),
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(opt.config.as_deref())?;
    let format = opt.format;

    match opt.command {
        Command::GenerateAddress {
            label,
            version,
            stream,
            leading_zeros,
            save,
        } => {
            // Flags win over the config file
            let mut generator = AddressGenerator::new(
                version.unwrap_or(config.address_version),
                stream.unwrap_or(config.stream),
            )
            .with_leading_zeros(config.ripe_leading_zeros);
            if let Some(zeros) = leading_zeros {
                generator = generator.with_leading_zeros(zeros);
            }
            let mut address = generator.generate(&label)?;

            if save {
                let store = SledStore::open(&config.data_dir)?;
                store.addresses().add(&mut address)?;
                store.flush()?;
            }
            print_value(
                format,
                json!({
                    "address": address.address,
                    "label": address.label,
                    "version": address.version,
                    "stream": address.stream,
                    "public_signing_key": HEXLOWER.encode(&address.public_signing_key),
                    "public_encryption_key": HEXLOWER.encode(&address.public_encryption_key),
                    "saved": save,
                }),
                &address.address,
            );
        }
        Command::ListAddresses => {
            let store = SledStore::open(&config.data_dir)?;
            let addresses = store.addresses().get_all()?;
            match format {
                OutputFormat::Json => {
                    let list: Vec<_> = addresses
                        .iter()
                        .map(|a| json!({ "label": a.label, "address": a.address }))
                        .collect();
                    println!("{}", serde_json::Value::Array(list));
                }
                OutputFormat::Text => {
                    for address in addresses {
                        println!("{}\t{}", address.address, address.label);
                    }
                }
            }
        }
        Command::DecodeAddress { address } => {
            let decoded = decode_address(&address)?;
            let ripe = HEXLOWER.encode(&decoded.ripe);
            print_value(
                format,
                json!({
                    "version": decoded.version,
                    "stream": decoded.stream,
                    "ripe": ripe,
                }),
                &format!(
                    "version {}, stream {}, ripe {ripe}",
                    decoded.version, decoded.stream
                ),
            );
        }
        Command::AddressTag { address } => {
            let (key, tag) = calculate_double_hash_of_address_data(&address)?;
            let tag = HEXLOWER.encode(&tag);
            let key = HEXLOWER.encode(&key);
            print_value(
                format,
                json!({ "tag": tag, "private_encryption_key": key }),
                &format!("tag {tag}\nkey {key}"),
            );
        }
        Command::MessageTags {
            address,
            since,
            until,
        } => {
            let until = until.unwrap_or_else(current_time);
            let tags = calculate_message_tags_between(&address, since, until)?;
            let tags: Vec<String> = tags.chunks(32).map(|tag| HEXLOWER.encode(tag)).collect();
            match format {
                OutputFormat::Json => println!("{}", json!(tags)),
                OutputFormat::Text => {
                    for tag in tags {
                        println!("{tag}");
                    }
                }
            }
        }
        Command::PowBenchmark {
            payload_size,
            ttl,
            workers,
        } => {
            let now = current_time();
            let mut object = BmObject::new(
                ObjectType::Msg,
                1,
                config.stream,
                now + ttl,
                random_bytes(payload_size),
            );
            let workers = workers.unwrap_or(config.pow_workers);
            let started = Instant::now();
            stamp_object(
                &mut object,
                &config.network_pow_params(),
                now,
                workers,
                config.random_pow_start,
                &PowCancel::new(),
            )?;
            let seconds = started.elapsed().as_secs();
            print_value(
                format,
                json!({
                    "nonce": object.nonce,
                    "workers": workers,
                    "payload_size": payload_size,
                    "seconds": started.elapsed().as_secs_f64(),
                }),
                &format!(
                    "nonce {} found by {workers} workers in {}",
                    object.nonce,
                    describe_duration(seconds)
                ),
            );
        }
    }
    Ok(())
}
