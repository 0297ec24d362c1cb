//! Pure, deterministic `Config -> ArgVector` mapping.
//!
//! Ordering and block-emission rules are grounded on
//! `engine/ffmpeg_args/builder.rs` (which walks a `FFmpegPreset` through
//! global/timeline/mapping/codec/audio/filter/subtitle/container/hardware
//! blocks in a fixed sequence) and `engine/template_args.rs`'s tokenizer,
//! adapted to a narrower, injection-safety-first block order:
//! `-i <in> -> video-codec -> audio-codec -> subtitle -> filter ->
//! custom-command -> rate -> -progress pipe:1 -> -y -> <out>`.

mod paths;
mod tokenize;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArgumentBuilderError, ValidationError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Libx264,
    Libx265,
    LibSvtAv1,
    Copy,
}

impl VideoCodec {
    fn as_arg(self) -> &'static str {
        match self {
            VideoCodec::Libx264 => "libx264",
            VideoCodec::Libx265 => "libx265",
            VideoCodec::LibSvtAv1 => "libsvtav1",
            VideoCodec::Copy => "copy",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Copy,
    Aac,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateControlMode {
    Crf,
    Cbr,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SubtitleMode {
    Copy,
    Drop,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicOptions {
    pub video_codec: VideoCodec,
    pub rate_control: RateControlMode,
    /// CRF value (when `rate_control == Crf`) or kbps (when `Cbr`).
    pub rate_value: u32,
    pub preset: String,
    pub audio_codec: AudioCodec,
    pub audio_bitrate_kbps: Option<u32>,
    pub subtitle_mode: SubtitleMode,
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedOptions {
    /// `-vf` filter chain, applied verbatim as a single argv element.
    pub filter_chain: Option<String>,
}

/// Dynamic config object: `basic`, `advanced`, and `customCommand`
/// sub-records. `#[serde(deny_unknown_fields)]` is deliberately **not** set
/// here because the builder itself is the rejection point for malformed
/// input — callers that deserialize from JSON should use
/// `#[serde(deny_unknown_fields)]` wrapper types at the transport boundary;
/// this struct is the validated in-process shape the builder consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOptions {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub basic: BasicOptions,
    #[serde(default)]
    pub advanced: AdvancedOptions,
    #[serde(default)]
    pub custom_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgVector {
    pub args: Vec<String>,
    pub display_string: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Builds the encoder invocation for `config`. Pure and deterministic: the
/// same `config` always yields a byte-for-byte identical `ArgVector`.
pub fn build(config: &ConversionOptions) -> Result<ArgVector, ArgumentBuilderError> {
    if config.input_path.as_os_str().is_empty() {
        return Err(ArgumentBuilderError::EmptyInput);
    }
    paths::reject_traversal("inputPath", &config.input_path)?;
    paths::reject_traversal("outputDir", &config.output_dir)?;

    let output_format = paths::strip_null_bytes(&config.basic.output_format);
    let output_path = paths::derive_output_path(&config.input_path, &config.output_dir, &output_format);

    let mut args: Vec<String> = vec!["ffmpeg".to_string()];

    args.push("-i".to_string());
    args.push(path_arg(&config.input_path));

    // video-codec block
    let video = config.basic.video_codec;
    args.push("-c:v".to_string());
    args.push(video.as_arg().to_string());

    // audio-codec block
    match config.basic.audio_codec {
        AudioCodec::Copy => {
            args.push("-c:a".to_string());
            args.push("copy".to_string());
        }
        AudioCodec::Aac => {
            args.push("-c:a".to_string());
            args.push("aac".to_string());
            if let Some(bitrate) = config.basic.audio_bitrate_kbps {
                args.push("-b:a".to_string());
                args.push(format!("{bitrate}k"));
            }
        }
    }

    // subtitle block
    match config.basic.subtitle_mode {
        SubtitleMode::Copy => {
            args.push("-c:s".to_string());
            args.push("copy".to_string());
        }
        SubtitleMode::Drop => args.push("-sn".to_string()),
        SubtitleMode::None => {}
    }

    // filter block
    if let Some(chain) = &config.advanced.filter_chain {
        let chain = paths::strip_null_bytes(chain);
        if !chain.is_empty() {
            args.push("-vf".to_string());
            args.push(chain);
        }
    }

    // custom-command block: literal tokens, never shell-interpreted.
    if let Some(raw) = &config.custom_command {
        let cleaned = paths::strip_null_bytes(raw);
        args.extend(tokenize::split_custom_command(&cleaned));
    }

    // rate block (omitted entirely when the video codec is `copy`).
    if video != VideoCodec::Copy {
        match config.basic.rate_control {
            RateControlMode::Cbr => {
                args.push("-b:v".to_string());
                args.push(format!("{}k", config.basic.rate_value));
            }
            RateControlMode::Crf => {
                args.push("-crf".to_string());
                args.push(config.basic.rate_value.to_string());
                args.push("-preset".to_string());
                args.push(config.basic.preset.clone());
            }
        }
    }

    args.push("-progress".to_string());
    args.push("pipe:1".to_string());
    args.push("-y".to_string());
    args.push(path_arg(&output_path));

    let display_string = format_command_for_log(&args);

    Ok(ArgVector {
        args,
        display_string,
        input_path: config.input_path.clone(),
        output_path,
    })
}

/// Validates an `ArgVector`: invoked by the Executor before
/// spawning, independent of `build` so a hand-assembled or deserialized
/// `ArgVector` (e.g. relayed to a follower) is re-checked at the point of
/// execution rather than trusted transitively.
pub fn validate(arg_vector: &ArgVector) -> Result<(), ValidationError> {
    match arg_vector.args.first() {
        Some(first) if first == "ffmpeg" => Ok(()),
        other => Err(ValidationError::DisallowedExecutable(other.cloned())),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn format_command_for_log(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(' ') {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(input: &str, output_dir: &str) -> ConversionOptions {
        ConversionOptions {
            input_path: PathBuf::from(input),
            output_dir: PathBuf::from(output_dir),
            basic: BasicOptions {
                video_codec: VideoCodec::Libx265,
                rate_control: RateControlMode::Crf,
                rate_value: 22,
                preset: "medium".to_string(),
                audio_codec: AudioCodec::Aac,
                audio_bitrate_kbps: Some(128),
                subtitle_mode: SubtitleMode::Copy,
                output_format: "mp4".to_string(),
            },
            advanced: AdvancedOptions::default(),
            custom_command: None,
        }
    }

    #[test]
    fn first_arg_is_literal_ffmpeg() {
        let vector = build(&options("in.mp4", "out")).unwrap();
        assert_eq!(vector.args[0], "ffmpeg");
    }

    #[test]
    fn no_empty_string_elements() {
        let vector = build(&options("in.mp4", "out")).unwrap();
        assert!(vector.args.iter().all(|a| !a.is_empty()));
    }

    #[test]
    fn builder_is_deterministic() {
        let cfg = options("in.mp4", "out");
        assert_eq!(build(&cfg).unwrap(), build(&cfg).unwrap());
    }

    #[test]
    fn block_order_matches_spec() {
        let vector = build(&options("in.mp4", "out")).unwrap();
        let idx = |needle: &str| vector.args.iter().position(|a| a == needle).unwrap();
        assert!(idx("-i") < idx("-c:v"));
        assert!(idx("-c:v") < idx("-c:a"));
        assert!(idx("-c:a") < idx("-c:s"));
        assert!(idx("-c:s") < idx("-crf"));
        assert!(idx("-crf") < idx("-progress"));
        assert!(idx("-progress") < vector.args.len() - 1);
    }

    #[test]
    fn trailing_flags_are_progress_then_y_then_output() {
        let vector = build(&options("in.mp4", "out")).unwrap();
        let len = vector.args.len();
        assert_eq!(vector.args[len - 4], "-progress");
        assert_eq!(vector.args[len - 3], "pipe:1");
        assert_eq!(vector.args[len - 2], "-y");
        assert_eq!(vector.args[len - 1], vector.output_path.to_string_lossy());
    }

    #[test]
    fn cbr_emits_bitrate_and_omits_crf() {
        let mut cfg = options("in.mp4", "out");
        cfg.basic.rate_control = RateControlMode::Cbr;
        cfg.basic.rate_value = 4000;
        let vector = build(&cfg).unwrap();
        assert!(vector.args.iter().any(|a| a == "-b:v"));
        assert!(!vector.args.iter().any(|a| a == "-crf"));
    }

    #[test]
    fn crf_emits_crf_and_preset_and_omits_bitrate() {
        let vector = build(&options("in.mp4", "out")).unwrap();
        assert!(vector.args.iter().any(|a| a == "-crf"));
        assert!(vector.args.iter().any(|a| a == "-preset"));
        assert!(!vector.args.iter().any(|a| a == "-b:v"));
    }

    #[test]
    fn copy_video_codec_omits_rate_block() {
        let mut cfg = options("in.mp4", "out");
        cfg.basic.video_codec = VideoCodec::Copy;
        let vector = build(&cfg).unwrap();
        assert!(!vector.args.iter().any(|a| a == "-crf" || a == "-b:v"));
    }

    #[test]
    fn path_traversal_is_rejected_before_any_job_would_be_created() {
        let cfg = options("../../etc/passwd", "out");
        let err = build(&cfg).unwrap_err();
        assert!(matches!(err, ArgumentBuilderError::PathTraversal { .. }));
    }

    #[test]
    fn empty_input_path_is_rejected() {
        let cfg = options("", "out");
        let err = build(&cfg).unwrap_err();
        assert_eq!(err, ArgumentBuilderError::EmptyInput);
    }

    #[test]
    fn custom_command_tokens_are_literal_and_never_start_a_new_command() {
        let mut cfg = options("in.mp4", "out");
        cfg.custom_command = Some("-c:v libx264; echo PWNED".to_string());
        let vector = build(&cfg).unwrap();
        assert!(vector.args.iter().any(|a| a == "echo"));
        assert!(vector.args.iter().any(|a| a == "PWNED"));
        // The semicolon stays glued to the preceding token: no argv element
        // is ever just ";" on its own, so nothing can be parsed as a second
        // command by anything that (incorrectly) tried to shell-interpret it.
        assert!(vector.args.iter().any(|a| a == "libx264;"));
        assert!(!vector.args.iter().any(|a| a == ";"));
    }

    #[test]
    fn output_path_derivation_uses_stem_converted_format() {
        let vector = build(&options("movie.mkv", "/out")).unwrap();
        assert_eq!(vector.output_path, PathBuf::from("/out/movie_converted.mp4"));
    }

    #[test]
    fn validate_accepts_well_formed_vector() {
        let vector = build(&options("in.mp4", "out")).unwrap();
        validate(&vector).expect("ffmpeg-led vector validates");
    }

    #[test]
    fn validate_rejects_tampered_argv0() {
        let mut vector = build(&options("in.mp4", "out")).unwrap();
        vector.args[0] = "sh".to_string();
        let err = validate(&vector).unwrap_err();
        assert!(matches!(err, ValidationError::DisallowedExecutable(_)));
    }
}
