/// 红框分割系统 (Boundary Segmentation)
///
/// 从原始帧中提取红色边框区域:
/// 1. RGB → HSV, 双色相区间阈值 → 掩码
/// 2. 形态学闭运算填补缺口
/// 3. 轮廓提取 (含内孔), 取面积最大的合格外轮廓
/// 4. 有合格内孔 → 以内孔多边形为开口区域; 否则以内缩的外接框为区域
/// 5. 短暂丢失时沿用上一帧区域 (有上限)
pub mod hsv;

pub use hsv::{red_mask, rgb_to_hsv, ChannelRange, HsvThresholds, ThresholdHandle};

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SegmenterConfig;
use crate::detection::{BBox, Point2};
use crate::input::Frame;

// ========== 多边形 ==========

/// 有序顶点多边形 (像素坐标, 隐式闭合)
#[derive(Clone, Debug, PartialEq, Default, Serialize)]
pub struct Polygon {
    pub points: Vec<Point2>,
}

impl Polygon {
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    pub fn from_bbox(b: &BBox) -> Self {
        Self::new(vec![
            Point2::new(b.x1, b.y1),
            Point2::new(b.x2, b.y1),
            Point2::new(b.x2, b.y2),
            Point2::new(b.x1, b.y2),
        ])
    }

    /// 有向面积 (鞋带公式)
    fn signed_area(&self) -> f32 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0f64;
        for i in 0..n {
            let p = self.points[i];
            let q = self.points[(i + 1) % n];
            acc += p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
        }
        (acc / 2.0) as f32
    }

    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }

    /// 面积加权质心; 退化多边形退回顶点均值
    pub fn centroid(&self) -> Point2 {
        let n = self.points.len();
        if n == 0 {
            return Point2::default();
        }
        let a = self.signed_area() as f64;
        if a.abs() < 1e-6 {
            let sx: f32 = self.points.iter().map(|p| p.x).sum();
            let sy: f32 = self.points.iter().map(|p| p.y).sum();
            return Point2::new(sx / n as f32, sy / n as f32);
        }
        let (mut cx, mut cy) = (0.0f64, 0.0f64);
        for i in 0..n {
            let p = self.points[i];
            let q = self.points[(i + 1) % n];
            let cross = p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
            cx += (p.x as f64 + q.x as f64) * cross;
            cy += (p.y as f64 + q.y as f64) * cross;
        }
        Point2::new((cx / (6.0 * a)) as f32, (cy / (6.0 * a)) as f32)
    }

    pub fn bounding_box(&self) -> BBox {
        let mut b = BBox::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for p in &self.points {
            b.x1 = b.x1.min(p.x);
            b.y1 = b.y1.min(p.y);
            b.x2 = b.x2.max(p.x);
            b.y2 = b.y2.max(p.y);
        }
        if self.points.is_empty() {
            BBox::default()
        } else {
            b
        }
    }

    /// 射线法判定点是否在多边形内
    pub fn contains(&self, pt: &Point2) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = self.points[i];
            let pj = self.points[j];
            if (pi.y > pt.y) != (pj.y > pt.y) {
                let x_cross = (pj.x - pi.x) * (pt.y - pi.y) / (pj.y - pi.y) + pi.x;
                if pt.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

// ========== 红框区域 ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// 找到了红框内孔, 区域 = 内孔多边形
    Opening,
    /// 只有外轮廓, 区域 = 内缩后的外接框
    Outline,
}

/// 当前红框几何 (及其来源帧序号)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundaryRegion {
    pub seq: u64,
    pub outer: Polygon,
    pub opening: Option<Polygon>,
    /// 外轮廓外接框
    pub bounds: BBox,
    /// 无内孔时的判定框
    pub inner_box: BBox,
    pub center: Point2,
    pub kind: RegionKind,
}

impl BoundaryRegion {
    /// 以开口多边形构造
    pub fn with_opening(seq: u64, outer: Polygon, opening: Polygon) -> Self {
        let bounds = outer.bounding_box();
        let center = opening.centroid();
        let inner_box = opening.bounding_box();
        Self {
            seq,
            outer,
            opening: Some(opening),
            bounds,
            inner_box,
            center,
            kind: RegionKind::Opening,
        }
    }

    /// 以外轮廓构造 (外接框每边内缩 `margin`)
    pub fn outline(seq: u64, outer: Polygon, margin: f32) -> Self {
        let bounds = outer.bounding_box();
        Self {
            seq,
            outer,
            opening: None,
            bounds,
            inner_box: bounds.shrink(margin),
            center: bounds.center(),
            kind: RegionKind::Outline,
        }
    }

    /// 点是否位于红框区域内
    pub fn contains(&self, p: &Point2) -> bool {
        match &self.opening {
            Some(opening) => opening.contains(p),
            None => self.inner_box.contains(p),
        }
    }

    /// 外接框面积 (大小门限)
    pub fn bounds_area(&self) -> f32 {
        self.bounds.area()
    }
}

/// 单帧分割结果
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionStatus {
    Found { region: BoundaryRegion },
    /// 本帧未找到, 沿用上一帧区域
    Carried { region: BoundaryRegion, missed: u32 },
    NotFound,
}

impl RegionStatus {
    pub fn region(&self) -> Option<&BoundaryRegion> {
        match self {
            RegionStatus::Found { region } | RegionStatus::Carried { region, .. } => Some(region),
            RegionStatus::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.region().is_some()
    }
}

// ========== 分割器 ==========

pub struct BoundarySegmenter {
    config: SegmenterConfig,
    thresholds: ThresholdHandle,
    last: Option<BoundaryRegion>,
    missed: u32,
}

impl BoundarySegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let thresholds = ThresholdHandle::new(config.thresholds);
        Self::with_thresholds(config, thresholds)
    }

    /// 共享外部阈值句柄 (调试接口调参)
    pub fn with_thresholds(config: SegmenterConfig, thresholds: ThresholdHandle) -> Self {
        Self {
            config,
            thresholds,
            last: None,
            missed: 0,
        }
    }

    pub fn thresholds(&self) -> ThresholdHandle {
        self.thresholds.clone()
    }

    /// 分割一帧 (含沿用逻辑)
    pub fn segment(&mut self, frame: &Frame) -> RegionStatus {
        let thresholds = self.thresholds.get();
        match extract_region(&frame.image, frame.seq, &thresholds, &self.config) {
            Some(region) => {
                if self.missed > 0 || self.last.is_none() {
                    info!(
                        "🟥 红框已定位 #{} ({:?}, 中心 {:.0},{:.0})",
                        frame.seq, region.kind, region.center.x, region.center.y
                    );
                }
                self.missed = 0;
                self.last = Some(region.clone());
                RegionStatus::Found { region }
            }
            None => {
                self.missed = self.missed.saturating_add(1);
                match &self.last {
                    Some(region) if self.missed <= self.config.max_carry_frames => {
                        debug!("红框丢失 {} 帧, 沿用 #{}", self.missed, region.seq);
                        RegionStatus::Carried {
                            region: region.clone(),
                            missed: self.missed,
                        }
                    }
                    Some(_) => {
                        info!("⬜ 红框丢失超过 {} 帧", self.config.max_carry_frames);
                        self.last = None;
                        RegionStatus::NotFound
                    }
                    None => RegionStatus::NotFound,
                }
            }
        }
    }
}

/// 无状态的单帧红框提取
pub fn extract_region(
    image: &RgbImage,
    seq: u64,
    thresholds: &HsvThresholds,
    config: &SegmenterConfig,
) -> Option<BoundaryRegion> {
    let mut mask = red_mask(image, thresholds);
    if config.close_radius > 0 {
        mask = morphology::close(&mask, Norm::LInf, config.close_radius);
    }
    region_from_mask(&mask, seq, config)
}

fn region_from_mask(mask: &GrayImage, seq: u64, config: &SegmenterConfig) -> Option<BoundaryRegion> {
    let contours: Vec<Contour<i32>> = find_contours(mask);

    // 外轮廓: 面积 + 宽高比过滤, 取最大
    let (outer_idx, outer_area) = contours
        .iter()
        .enumerate()
        .filter(|(_, c)| c.border_type == BorderType::Outer)
        .filter_map(|(i, c)| {
            let poly = to_polygon(c);
            let area = poly.area();
            if area < config.min_outer_area {
                return None;
            }
            let b = poly.bounding_box();
            if b.height() <= 0.0 {
                return None;
            }
            let aspect = b.width() / b.height();
            if aspect < config.min_aspect_ratio || aspect > config.max_aspect_ratio {
                return None;
            }
            Some((i, area))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let outer = simplify(&contours[outer_idx], config.approx_epsilon_ratio);

    // 内孔: 该外轮廓的子轮廓中面积最大者
    let hole = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Hole && c.parent == Some(outer_idx))
        .map(|c| (c, to_polygon(c).area()))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    if let Some((hole, hole_area)) = hole {
        let ratio = hole_area / outer_area;
        if hole_area >= config.min_inner_area
            && ratio >= config.hole_ratio_min
            && ratio <= config.hole_ratio_max
        {
            let opening = simplify(hole, config.approx_epsilon_ratio);
            return Some(BoundaryRegion::with_opening(seq, outer, opening));
        }
    }

    Some(BoundaryRegion::outline(seq, outer, config.outline_margin))
}

fn to_polygon(contour: &Contour<i32>) -> Polygon {
    Polygon::new(
        contour
            .points
            .iter()
            .map(|p| Point2::new(p.x as f32, p.y as f32))
            .collect(),
    )
}

/// Douglas-Peucker 简化, 点数不足时保留原轮廓
fn simplify(contour: &Contour<i32>, epsilon_ratio: f32) -> Polygon {
    let epsilon = arc_length(&contour.points, true) * epsilon_ratio as f64;
    let approx = approximate_polygon_dp(&contour.points, epsilon, true);
    if approx.len() >= 3 {
        Polygon::new(
            approx
                .iter()
                .map(|p| Point2::new(p.x as f32, p.y as f32))
                .collect(),
        )
    } else {
        to_polygon(contour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const RED: Rgb<u8> = Rgb([230, 20, 20]);
    const GRAY: Rgb<u8> = Rgb([90, 90, 90]);

    fn red_frame_image() -> RgbImage {
        let mut img = RgbImage::from_pixel(400, 320, GRAY);
        draw_filled_rect_mut(&mut img, Rect::at(100, 100).of_size(200, 160), RED);
        draw_filled_rect_mut(&mut img, Rect::at(115, 115).of_size(170, 130), GRAY);
        img
    }

    fn frame(seq: u64, img: RgbImage) -> Frame {
        Frame::new(seq, Utc::now(), img)
    }

    #[test]
    fn test_polygon_area_and_contains() {
        let square = Polygon::from_bbox(&BBox::new(0.0, 0.0, 10.0, 10.0));
        assert!((square.area() - 100.0).abs() < 1e-3);
        let c = square.centroid();
        assert!((c.x - 5.0).abs() < 1e-3 && (c.y - 5.0).abs() < 1e-3);
        assert!(square.contains(&Point2::new(5.0, 5.0)));
        assert!(!square.contains(&Point2::new(11.0, 5.0)));

        // 凹多边形 (L 形)
        let l = Polygon::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 4.0),
            Point2::new(4.0, 4.0),
            Point2::new(4.0, 10.0),
            Point2::new(0.0, 10.0),
        ]);
        assert!(l.contains(&Point2::new(2.0, 8.0)));
        assert!(!l.contains(&Point2::new(8.0, 8.0)));
    }

    #[test]
    fn test_segment_finds_opening() {
        let mut seg = BoundarySegmenter::new(SegmenterConfig::default());
        let status = seg.segment(&frame(1, red_frame_image()));
        let region = status.region().expect("region");
        assert_eq!(region.kind, RegionKind::Opening);
        assert_eq!(region.seq, 1);
        assert!((region.center.x - 200.0).abs() < 3.0);
        assert!((region.center.y - 180.0).abs() < 3.0);
        assert!(region.contains(&Point2::new(200.0, 180.0)));
        assert!(!region.contains(&Point2::new(105.0, 105.0)));
        assert!(!region.contains(&Point2::new(20.0, 20.0)));
    }

    #[test]
    fn test_solid_blob_uses_outline() {
        let mut img = RgbImage::from_pixel(300, 300, GRAY);
        draw_filled_rect_mut(&mut img, Rect::at(50, 50).of_size(100, 100), RED);
        let region = extract_region(
            &img,
            3,
            &HsvThresholds::default(),
            &SegmenterConfig::default(),
        )
        .expect("region");
        assert_eq!(region.kind, RegionKind::Outline);
        assert!(region.opening.is_none());
        assert!(region.contains(&Point2::new(100.0, 100.0)));
        // 10% 内缩后边缘不算在内
        assert!(!region.contains(&Point2::new(52.0, 100.0)));
    }

    #[test]
    fn test_small_blob_rejected() {
        let mut img = RgbImage::from_pixel(200, 200, GRAY);
        draw_filled_rect_mut(&mut img, Rect::at(10, 10).of_size(20, 20), RED);
        let region = extract_region(
            &img,
            1,
            &HsvThresholds::default(),
            &SegmenterConfig::default(),
        );
        assert!(region.is_none());
    }

    #[test]
    fn test_thin_strip_rejected_by_aspect_ratio() {
        let mut img = RgbImage::from_pixel(400, 100, GRAY);
        draw_filled_rect_mut(&mut img, Rect::at(10, 40).of_size(380, 8), RED);
        let region = extract_region(
            &img,
            1,
            &HsvThresholds::default(),
            &SegmenterConfig::default(),
        );
        assert!(region.is_none());
    }

    #[test]
    fn test_carry_forward_then_not_found() {
        let config = SegmenterConfig::default();
        let max_carry = config.max_carry_frames;
        let mut seg = BoundarySegmenter::new(config);
        assert!(matches!(
            seg.segment(&frame(1, red_frame_image())),
            RegionStatus::Found { .. }
        ));

        let empty = RgbImage::from_pixel(400, 320, GRAY);
        for i in 1..=max_carry {
            match seg.segment(&frame(1 + i as u64, empty.clone())) {
                RegionStatus::Carried { region, missed } => {
                    assert_eq!(missed, i);
                    assert_eq!(region.seq, 1);
                }
                other => panic!("expected carried, got {:?}", other),
            }
        }
        assert_eq!(seg.segment(&frame(99, empty.clone())), RegionStatus::NotFound);
        assert_eq!(seg.segment(&frame(100, empty)), RegionStatus::NotFound);

        // 重新出现
        assert!(seg.segment(&frame(101, red_frame_image())).is_found());
    }

    #[test]
    fn test_threshold_handle_applies_next_frame() {
        let mut seg = BoundarySegmenter::new(SegmenterConfig::default());
        let handle = seg.thresholds();
        let mut t = HsvThresholds::default();
        t.value = ChannelRange::new(250, 255); // 红色亮度 230 不再命中
        handle.set(t);
        assert_eq!(seg.segment(&frame(1, red_frame_image())), RegionStatus::NotFound);
    }
}
