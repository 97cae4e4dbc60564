//! Catalog of callable workflow features.
//!
//! Everything here is descriptive: routing keys, reply flow kinds,
//! time-to-live budgets, and the parameter fields a host UI presents. The
//! actual request/response mechanics live in [`crate::client`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How replies for a feature reach their terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The first reply is terminal: success unless it carries an error
    /// message.
    SingleReply,

    /// Replies stream status updates; only `completed` (or a failure)
    /// settles the call.
    VideoStaged,
}

/// One parameter a feature accepts, as presented by a host UI.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Static description of one callable feature.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    /// Human-facing name, used in log lines and timeout messages.
    pub display_name: &'static str,

    /// Routing key on the request exchange; selects the worker service.
    pub target_service: &'static str,

    /// Feature selector injected into the request payload.
    pub target_feature: &'static str,

    /// Reply flow kind.
    pub flow: Flow,

    /// Maximum time to wait for a terminal reply.
    pub ttl: Duration,

    /// Parameter fields.
    pub fields: &'static [FieldSpec],
}

/// Image-to-image transformation.
pub const IMAGE2IMAGE: FeatureSpec = FeatureSpec {
    display_name: "Image2Image",
    target_service: "image2image",
    target_feature: "image2image",
    flow: Flow::SingleReply,
    ttl: Duration::from_secs(60),
    fields: &[
        FieldSpec {
            name: "file",
            label: "File",
            description: "The input image file",
            required: true,
        },
        FieldSpec {
            name: "anotherFile",
            label: "Another File",
            description: "The second input image file",
            required: true,
        },
        FieldSpec {
            name: "styleCombineBackground",
            label: "Style Combine Background",
            description: "The style to combine with the background",
            required: true,
        },
        FieldSpec {
            name: "prompt",
            label: "Prompt",
            description: "The prompt to guide the image transformation",
            required: true,
        },
    ],
};

/// Premium image-to-image transformation with extended controls.
pub const IMAGE2IMAGE_PREMIUM: FeatureSpec = FeatureSpec {
    display_name: "Image2ImagePremium",
    target_service: "ai-core-art-premium",
    target_feature: "image2image",
    flow: Flow::SingleReply,
    ttl: Duration::from_secs(5 * 60),
    fields: &[
        FieldSpec {
            name: "file",
            label: "Input Image File",
            description: "The input image file to transform",
            required: true,
        },
        FieldSpec {
            name: "mode",
            label: "Mode",
            description: "The transformation mode",
            required: true,
        },
        FieldSpec {
            name: "style",
            label: "Style",
            description: "The style to apply",
            required: true,
        },
        FieldSpec {
            name: "positivePrompt",
            label: "Positive Prompt",
            description: "Positive prompt to guide the transformation",
            required: false,
        },
        FieldSpec {
            name: "negativePrompt",
            label: "Negative Prompt",
            description: "Negative prompt to guide the transformation",
            required: false,
        },
        FieldSpec {
            name: "fixWidth",
            label: "Fix Width",
            description: "Fixed output width",
            required: false,
        },
        FieldSpec {
            name: "fixHeight",
            label: "Fix Height",
            description: "Fixed output height",
            required: false,
        },
        FieldSpec {
            name: "fixWidthAndHeight",
            label: "Fix Width and Height",
            description: "Whether to keep both output dimensions fixed",
            required: false,
        },
        FieldSpec {
            name: "useControlnet",
            label: "Use Controlnet",
            description: "Whether to guide generation with controlnet",
            required: false,
        },
        FieldSpec {
            name: "applyPulid",
            label: "Apply Pulid",
            description: "Whether to apply identity preservation",
            required: false,
        },
        FieldSpec {
            name: "seed",
            label: "Seed",
            description: "Seed for reproducible results",
            required: false,
        },
        FieldSpec {
            name: "fastMode",
            label: "Fast Mode",
            description: "Whether to trade quality for speed",
            required: false,
        },
        FieldSpec {
            name: "imageSize",
            label: "Image Size",
            description: "Size of generated images",
            required: false,
        },
    ],
};

/// Background/outpainting image combination.
pub const COMBINE_IMAGE: FeatureSpec = FeatureSpec {
    display_name: "CombineImage",
    target_service: "ai-core-outpainting",
    target_feature: "combineImages",
    flow: Flow::SingleReply,
    ttl: Duration::from_secs(60),
    fields: &[
        FieldSpec {
            name: "file",
            label: "File",
            description: "The input image file",
            required: true,
        },
        FieldSpec {
            name: "anotherFile",
            label: "Another File",
            description: "The second input image file",
            required: true,
        },
        FieldSpec {
            name: "styleCombineBackground",
            label: "Style Combine Background",
            description: "The style to combine with the background",
            required: true,
        },
        FieldSpec {
            name: "prompt",
            label: "Prompt",
            description: "The prompt to guide the image transformation",
            required: true,
        },
    ],
};

/// Video generation with lite features.
pub const VIDEO_LITE: FeatureSpec = FeatureSpec {
    display_name: "VideoLite",
    target_service: "ai-core-video-lite",
    target_feature: "video-lite",
    flow: Flow::VideoStaged,
    ttl: Duration::from_secs(10 * 60),
    fields: &[
        FieldSpec {
            name: "file",
            label: "Image 01",
            description: "The input file to transform",
            required: true,
        },
        FieldSpec {
            name: "file2",
            label: "Image 02",
            description: "Second input file (optional)",
            required: false,
        },
        FieldSpec {
            name: "mode",
            label: "Mode",
            description: "The transformation mode",
            required: true,
        },
        FieldSpec {
            name: "morphFiles",
            label: "Morph Files",
            description: "Files for morphing",
            required: false,
        },
        FieldSpec {
            name: "positivePrompt",
            label: "Positive Prompt",
            description: "Positive prompt to guide the transformation",
            required: false,
        },
        FieldSpec {
            name: "negativePrompt",
            label: "Negative Prompt",
            description: "Negative prompt to guide the transformation",
            required: false,
        },
        FieldSpec {
            name: "backgroundPrompt",
            label: "Background Prompt",
            description: "Background prompt for generated scenes",
            required: false,
        },
        FieldSpec {
            name: "frameNumber",
            label: "Frame Number",
            description: "Number of frames",
            required: false,
        },
        FieldSpec {
            name: "frameRate",
            label: "Frame Rate",
            description: "Frames per second of the output",
            required: false,
        },
        FieldSpec {
            name: "width",
            label: "Width",
            description: "Width of output",
            required: false,
        },
        FieldSpec {
            name: "height",
            label: "Height",
            description: "Height of output",
            required: false,
        },
        FieldSpec {
            name: "guidanceScale",
            label: "Guidance Scale",
            description: "Guidance scale for generation",
            required: false,
        },
        FieldSpec {
            name: "steps",
            label: "Steps",
            description: "Number of inference steps",
            required: false,
        },
        FieldSpec {
            name: "imageSize",
            label: "Image Size",
            description: "Size of generated images",
            required: false,
        },
        FieldSpec {
            name: "useImageCaption",
            label: "Use Image Caption",
            description: "Whether to use image captioning",
            required: false,
        },
        FieldSpec {
            name: "useFrameInterpolation",
            label: "Use Frame Interpolation",
            description: "Whether to use frame interpolation",
            required: false,
        },
        FieldSpec {
            name: "enableSwapface",
            label: "Enable Swapface",
            description: "Whether to enable face swapping",
            required: false,
        },
        FieldSpec {
            name: "enableInpaint",
            label: "Enable Inpaint",
            description: "Whether to enable inpainting",
            required: false,
        },
        FieldSpec {
            name: "upscalerXTimes",
            label: "Upscaler X Times",
            description: "Upscaling factor",
            required: false,
        },
        FieldSpec {
            name: "loraName",
            label: "Lora Name",
            description: "Name of LoRA model to use",
            required: false,
        },
        FieldSpec {
            name: "additionalOptions",
            label: "Additional Options",
            description: "Additional processing options",
            required: false,
        },
        FieldSpec {
            name: "enableAssistant",
            label: "Enable Assistant",
            description: "Whether to enable the prompt assistant",
            required: false,
        },
        FieldSpec {
            name: "seed",
            label: "Seed",
            description: "Seed for reproducible results",
            required: false,
        },
    ],
};

/// Parameters for [`IMAGE2IMAGE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image2ImageParams {
    pub file: String,
    pub another_file: String,
    pub style_combine_background: String,
    pub prompt: String,
}

/// Parameters for [`COMBINE_IMAGE`]; same shape as [`Image2ImageParams`].
pub type CombineImageParams = Image2ImageParams;

/// Parameters for [`IMAGE2IMAGE_PREMIUM`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePremiumParams {
    pub file: String,
    pub mode: String,
    pub style: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub fix_width: u32,
    pub fix_height: u32,
    pub fix_width_and_height: bool,
    pub use_controlnet: bool,
    pub apply_pulid: bool,
    pub seed: i64,
    pub fast_mode: bool,
    pub image_size: u32,
}

/// Transformation modes for [`VIDEO_LITE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoMode {
    #[serde(rename = "fusion")]
    Fusion,
    #[serde(rename = "hugging")]
    Hugging,
    #[serde(rename = "i2v")]
    ImageToVideo,
    #[serde(rename = "i2vp")]
    ImageToVideoPremium,
    #[serde(rename = "kissing")]
    Kissing,
    #[serde(rename = "muscle")]
    Muscle,
    #[serde(rename = "passionateKissing")]
    PassionateKissing,
    #[serde(rename = "t2g")]
    TextToGif,
}

/// Parameters for [`VIDEO_LITE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoLiteParams {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file2: Option<String>,
    pub mode: VideoMode,
    pub morph_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positive_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_prompt: Option<String>,
    pub frame_number: u32,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub guidance_scale: f64,
    pub steps: u32,
    pub image_size: u32,
    pub use_image_caption: bool,
    pub use_frame_interpolation: bool,
    pub enable_swapface: bool,
    pub enable_inpaint: bool,
    pub upscaler_x_times: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_name: Option<String>,
    pub additional_options: Vec<String>,
    pub enable_assistant: bool,
    pub seed: i64,
}

impl VideoLiteParams {
    /// Parameters for `file` and `mode` with every other knob at its
    /// default.
    pub fn new(file: impl Into<String>, mode: VideoMode) -> Self {
        Self {
            file: file.into(),
            file2: None,
            mode,
            morph_files: Vec::new(),
            positive_prompt: None,
            negative_prompt: None,
            background_prompt: None,
            frame_number: 30,
            frame_rate: 30,
            width: 512,
            height: 512,
            guidance_scale: 7.5,
            steps: 20,
            image_size: 512,
            use_image_caption: false,
            use_frame_interpolation: false,
            enable_swapface: false,
            enable_inpaint: false,
            upscaler_x_times: 1,
            lora_name: None,
            additional_options: Vec::new(),
            enable_assistant: false,
            seed: -1,
        }
    }
}
