use image::RgbImage;

/// ATR human-parsing labels produced by the parsing model.
pub mod labels {
    pub const BACKGROUND: u8 = 0;
    pub const HAT: u8 = 1;
    pub const HAIR: u8 = 2;
    pub const SUNGLASSES: u8 = 3;
    pub const UPPER_CLOTHES: u8 = 4;
    pub const SKIRT: u8 = 5;
    pub const PANTS: u8 = 6;
    pub const DRESS: u8 = 7;
    pub const BELT: u8 = 8;
    pub const LEFT_SHOE: u8 = 9;
    pub const RIGHT_SHOE: u8 = 10;
    pub const FACE: u8 = 11;
    pub const LEFT_LEG: u8 = 12;
    pub const RIGHT_LEG: u8 = 13;
    pub const LEFT_ARM: u8 = 14;
    pub const RIGHT_ARM: u8 = 15;
    pub const BAG: u8 = 16;
    pub const SCARF: u8 = 17;

    pub const COUNT: usize = 18;
}

/// Per-pixel semantic labels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl LabelMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![labels::BACKGROUND; (width * height) as usize],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, label: u8) {
        self.data[(y * self.width + x) as usize] = label;
    }

    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|&&l| l == label).count()
    }

    pub fn contains_any(&self, wanted: &[u8]) -> bool {
        self.data.iter().any(|l| wanted.contains(l))
    }
}

/// OpenPose COCO-18 keypoint layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    Neck = 1,
    RightShoulder = 2,
    RightElbow = 3,
    RightWrist = 4,
    LeftShoulder = 5,
    LeftElbow = 6,
    LeftWrist = 7,
    RightHip = 8,
    RightKnee = 9,
    RightAnkle = 10,
    LeftHip = 11,
    LeftKnee = 12,
    LeftAnkle = 13,
    RightEye = 14,
    LeftEye = 15,
    RightEar = 16,
    LeftEar = 17,
}

impl KeypointIndex {
    pub const COUNT: usize = 18;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Canvas pixel coordinates.
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// Sparse landmarks plus the frame size they were detected in.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointSet {
    pub width: u32,
    pub height: u32,
    pub points: [Keypoint; KeypointIndex::COUNT],
}

impl KeypointSet {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            points: [Keypoint::default(); KeypointIndex::COUNT],
        }
    }

    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.points[index as usize]
    }

    pub fn set(&mut self, index: KeypointIndex, point: Keypoint) {
        self.points[index as usize] = point;
    }

    /// Returns the keypoint only if it clears the confidence threshold.
    pub fn valid(&self, index: KeypointIndex, threshold: f32) -> Option<&Keypoint> {
        let kp = self.get(index);
        kp.is_valid(threshold).then_some(kp)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Perception outputs, all pixel-aligned to one person canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct PerceptionBundle {
    pub densepose: RgbImage,
    pub labels: LabelMap,
    pub keypoints: KeypointSet,
    pub skeleton: RgbImage,
}

impl PerceptionBundle {
    pub fn dimensions(&self) -> (u32, u32) {
        self.labels.dimensions()
    }
}
