// YOLOv8 / YOLO11 ONNX 检测后端
// 包含: 模型加载、预处理、推理、后处理

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use ndarray::{s, ArrayViewD, Axis, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tracing::info;

use super::detector::ObjectDetector;
use super::types::{BBox, Detection};
use crate::config::DetectorConfig;
use crate::input::Frame;
use crate::non_max_suppression;

const CXYWH_OFFSET: usize = 4;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// YOLO 检测后端
pub struct YoloDetector {
    session: Session,
    input_name: String,
    name: String,
    size: u32,
    conf: f32,
    iou: f32,
    resizer: fr::Resizer,
}

impl YoloDetector {
    pub fn new(model_path: &str, config: &DetectorConfig) -> Result<Self> {
        info!("📦 加载模型: {}", model_path);
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .with_context(|| format!("加载模型失败: {}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());

        info!(
            "✅ 模型就绪: 输入 {} ({}x{})",
            input_name, config.input_size, config.input_size
        );
        Ok(Self {
            session,
            input_name,
            name: format!("yolo:{}", model_path),
            size: config.input_size,
            conf: config.confidence_floor,
            iou: config.nms_iou_threshold,
            resizer: fr::Resizer::new(),
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32) -> (f32, u32, u32) {
        let s = self.size as f32;
        let r = (s / w0).min(s / h0);
        (
            r,
            ((w0 * r).round() as u32).max(1),
            ((h0 * r).round() as u32).max(1),
        )
    }

    /// 预处理: 等比缩放到左上角, 其余填充 144/255, 输出 NCHW
    fn preprocess(&mut self, frame: &Frame) -> Result<(Vec<f32>, f32)> {
        let (w0, h0) = (frame.width(), frame.height());
        if w0 == 0 || h0 == 0 {
            bail!("空帧 #{}", frame.seq);
        }
        let (ratio, w_new, h_new) = self.scale_wh(w0 as f32, h0 as f32);

        let src = fr::images::Image::from_vec_u8(
            w0,
            h0,
            frame.image.as_raw().clone(),
            fr::PixelType::U8x3,
        )?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        let size = self.size as usize;
        let plane = size * size;
        let mut input = vec![144.0 / 255.0; 3 * plane];
        let pixels = dst.buffer();
        for y in 0..h_new as usize {
            for x in 0..w_new as usize {
                let src_idx = (y * w_new as usize + x) * 3;
                let dst_idx = y * size + x;
                input[dst_idx] = pixels[src_idx] as f32 / 255.0;
                input[plane + dst_idx] = pixels[src_idx + 1] as f32 / 255.0;
                input[2 * plane + dst_idx] = pixels[src_idx + 2] as f32 / 255.0;
            }
        }
        Ok((input, ratio))
    }
}

/// 后处理: [1, 4+nc, N] → 检测框 (原图坐标) → NMS
fn postprocess(
    preds: ArrayViewD<'_, f32>,
    ratio: f32,
    (width_original, height_original): (f32, f32),
    (conf, iou): (f32, f32),
) -> Result<Vec<Detection>> {
    if preds.ndim() != 3 || preds.shape()[1] <= CXYWH_OFFSET {
        bail!("不支持的输出形状: {:?}", preds.shape());
    }
    let nc = preds.shape()[1] - CXYWH_OFFSET;
    let anchor = preds.index_axis(Axis(0), 0);

    let mut data = Vec::new();
    for pred in anchor.axis_iter(Axis(1)) {
        let bbox = pred.slice(s![0..CXYWH_OFFSET]);
        let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);

        let Some((id, &confidence)) = clss
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };
        if confidence < conf {
            continue;
        }

        let cx = bbox[0] / ratio;
        let cy = bbox[1] / ratio;
        let w = bbox[2] / ratio;
        let h = bbox[3] / ratio;
        let b = BBox::from_cxcywh(cx, cy, w, h);
        let b = BBox::new(
            b.x1.clamp(0.0, width_original),
            b.y1.clamp(0.0, height_original),
            b.x2.clamp(0.0, width_original),
            b.y2.clamp(0.0, height_original),
        );
        let label = COCO_CLASSES.get(id).copied().unwrap_or("unknown");
        data.push(Detection::new(b, confidence, id as u32, label));
    }

    non_max_suppression(&mut data, iou);
    Ok(data)
}

impl ObjectDetector for YoloDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, ratio) = self.preprocess(frame)?;
        let thresholds = (self.conf, self.iou);
        let size = self.size as usize;
        let tensor = Tensor::from_array(([1usize, 3, size, size], input.into_boxed_slice()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let preds = ArrayViewD::from_shape(IxDyn(&dims), data)?;

        postprocess(
            preds,
            ratio,
            (frame.width() as f32, frame.height() as f32),
            thresholds,
        )
    }
}
