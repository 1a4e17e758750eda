use bytes::Bytes;
use semlink_client::WaitMask;
use semlink_frame::{Args, WireReader};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cmd::{connect, SendArgs, WireType};
use crate::exit::{client_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{hex_dump, print_record, OutputFormat};

#[derive(Serialize)]
struct SendOutput<'a> {
    command: &'a str,
    response: bool,
    response_len: usize,
    hex: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    values: Vec<Value>,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let body = encode_args(&args.args)?;
    let mask = args
        .wait
        .as_deref()
        .map(|text| {
            text.parse::<WaitMask>()
                .map_err(|err| CliError::usage(format!("--wait: {err}")))
        })
        .transpose()?;

    let client = connect::connect(&args.connection)?;
    let context = format!("{} failed", args.name);

    if args.no_response {
        client
            .send_no_response(&args.name, &body)
            .map_err(|err| client_error(&context, err))?;
        let output = SendOutput {
            command: &args.name,
            response: false,
            response_len: 0,
            hex: String::new(),
            values: Vec::new(),
        };
        print_record(&output, &[("command", args.name.clone())], format);
        client.disconnect();
        return Ok(SUCCESS);
    }

    let response = match mask {
        Some(mask) => client.send_with_wait(&args.name, &body, mask),
        None => client.send(&args.name, &body),
    }
    .map_err(|err| client_error(&context, err))?;

    let values = decode_values(&response, &args.decode)?;
    let output = SendOutput {
        command: &args.name,
        response: true,
        response_len: response.len(),
        hex: hex_dump(&response),
        values,
    };

    let mut fields = vec![
        ("command", args.name.clone()),
        ("response_len", output.response_len.to_string()),
        ("hex", output.hex.clone()),
    ];
    if !output.values.is_empty() {
        let rendered = output
            .values
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join(", ");
        fields.push(("values", rendered));
    }
    print_record(&output, &fields, format);

    client.disconnect();
    Ok(SUCCESS)
}

/// Encode `type:value` tokens in order.
fn encode_args(tokens: &[String]) -> CliResult<Bytes> {
    let mut args = Args::new();
    for token in tokens {
        let (kind, value) = token
            .split_once(':')
            .ok_or_else(|| CliError::usage(format!("argument {token:?} is not type:value")))?;
        let bad = || CliError::usage(format!("argument {token:?}: invalid {kind} value"));
        args = match kind {
            "i" | "int" => args.int(value.parse().map_err(|_| bad())?),
            "u" | "uint" => args.uint(value.parse().map_err(|_| bad())?),
            "f" | "float" => args.float(value.parse().map_err(|_| bad())?),
            "s" | "str" => args
                .string(value)
                .map_err(|err| CliError::usage(format!("argument {token:?}: {err}")))?,
            other => {
                return Err(CliError::usage(format!(
                    "argument {token:?}: unknown type {other:?} (use i, u, f or s)"
                )))
            }
        };
    }
    Ok(args.finish())
}

fn decode_values(body: &[u8], types: &[WireType]) -> CliResult<Vec<Value>> {
    let mut reader = WireReader::new(body);
    types
        .iter()
        .map(|kind| {
            let value = match kind {
                WireType::I32 => reader.i32().map(|v| json!(v)),
                WireType::U32 => reader.u32().map(|v| json!(v)),
                WireType::F64 => reader.f64().map(|v| json!(v)),
                WireType::Str => reader.string().map(|v| json!(v)),
            };
            value.map_err(|err| {
                CliError::new(DATA_INVALID, format!("decoding response: {err}"))
            })
        })
        .collect()
}
