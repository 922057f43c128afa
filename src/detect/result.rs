use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel coordinates. `x1 < x2`, `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self, InvalidDetection> {
        let bbox = Self { x1, y1, x2, y2 };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<(), InvalidDetection> {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(InvalidDetection::NonFinite);
        }
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(InvalidDetection::DegenerateBox(*self));
        }
        Ok(())
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn centroid(&self) -> (f32, f32) {
        ((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    /// Intersection over union; 0 for disjoint boxes.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

impl From<(f32, f32, f32, f32)> for BBox {
    /// Unchecked conversion; call `validate` before trusting the result.
    fn from((x1, y1, x2, y2): (f32, f32, f32, f32)) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// One object of a known class found in a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(
        class_name: impl Into<String>,
        confidence: f32,
        bbox: impl Into<BBox>,
    ) -> Result<Self, InvalidDetection> {
        let detection = Self {
            class_name: class_name.into(),
            confidence,
            bbox: bbox.into(),
        };
        detection.validate()?;
        Ok(detection)
    }

    pub fn validate(&self) -> Result<(), InvalidDetection> {
        if self.class_name.trim().is_empty() {
            return Err(InvalidDetection::EmptyClass);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(InvalidDetection::ConfidenceOutOfRange(self.confidence));
        }
        self.bbox.validate()
    }

    pub fn centroid(&self) -> (f32, f32) {
        self.bbox.centroid()
    }
}

impl std::fmt::Display for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} conf={:.2} bbox=({:.0},{:.0},{:.0},{:.0})",
            self.class_name, self.confidence, self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2
        )
    }
}

/// Input-validation failure for a single detection.
#[derive(Clone, Debug, PartialEq)]
pub enum InvalidDetection {
    DegenerateBox(BBox),
    NonFinite,
    ConfidenceOutOfRange(f32),
    EmptyClass,
}

impl std::fmt::Display for InvalidDetection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidDetection::DegenerateBox(b) => write!(
                f,
                "degenerate bbox ({}, {}, {}, {}): requires x1 < x2 and y1 < y2",
                b.x1, b.y1, b.x2, b.y2
            ),
            InvalidDetection::NonFinite => write!(f, "bbox has non-finite coordinates"),
            InvalidDetection::ConfidenceOutOfRange(c) => {
                write!(f, "confidence {} outside [0, 1]", c)
            }
            InvalidDetection::EmptyClass => write!(f, "detection has an empty class name"),
        }
    }
}
impl std::error::Error for InvalidDetection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let b = BBox::new(20.0, 20.0, 30.0, 30.0).unwrap();
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);
        let half = BBox::new(5.0, 0.0, 15.0, 10.0).unwrap();
        assert!((a.iou(&half) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn centroid_and_area() {
        let bbox = BBox::new(10.0, 10.0, 50.0, 30.0).unwrap();
        assert_eq!(bbox.centroid(), (30.0, 20.0));
        assert_eq!(bbox.area(), 800.0);
    }

    #[test]
    fn degenerate_boxes_are_rejected() {
        assert!(matches!(
            BBox::new(10.0, 10.0, 10.0, 20.0),
            Err(InvalidDetection::DegenerateBox(_))
        ));
        assert!(matches!(
            BBox::new(10.0, 30.0, 20.0, 20.0),
            Err(InvalidDetection::DegenerateBox(_))
        ));
        assert_eq!(
            BBox::new(f32::NAN, 0.0, 1.0, 1.0),
            Err(InvalidDetection::NonFinite)
        );
    }

    #[test]
    fn detection_validation() {
        assert!(Detection::new("cup", 0.9, (0.0, 0.0, 4.0, 4.0)).is_ok());
        assert_eq!(
            Detection::new("cup", 1.5, (0.0, 0.0, 4.0, 4.0)),
            Err(InvalidDetection::ConfidenceOutOfRange(1.5))
        );
        assert_eq!(
            Detection::new("  ", 0.5, (0.0, 0.0, 4.0, 4.0)),
            Err(InvalidDetection::EmptyClass)
        );
    }
}
