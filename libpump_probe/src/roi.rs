use ndarray::{s, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use super::error::RoiError;

/// Rectangular window on a detector frame. x runs along columns, y along rows,
/// and the upper bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x1: usize,
    pub y1: usize,
    pub x2: usize,
    pub y2: usize,
}

impl RegionOfInterest {
    pub fn new(x1: usize, y1: usize, x2: usize, y2: usize) -> Result<Self, RoiError> {
        let roi = Self { x1, y1, x2, y2 };
        roi.validate()?;
        Ok(roi)
    }

    pub fn validate(&self) -> Result<(), RoiError> {
        if self.x1 < self.x2 && self.y1 < self.y2 {
            Ok(())
        } else {
            Err(RoiError::Inverted {
                x1: self.x1,
                y1: self.y1,
                x2: self.x2,
                y2: self.y2,
            })
        }
    }

    /// Check that the window lies inside a frame of `(rows, cols)`
    pub fn check_fits(&self, shape: (usize, usize)) -> Result<(), RoiError> {
        self.validate()?;
        let (height, width) = shape;
        if self.x2 > width || self.y2 > height {
            return Err(RoiError::OutOfBounds {
                x2: self.x2,
                y2: self.y2,
                width,
                height,
            });
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.x2 - self.x1
    }

    pub fn height(&self) -> usize {
        self.y2 - self.y1
    }

    pub fn slice_frame<'a>(
        &self,
        frame: ArrayView2<'a, f64>,
    ) -> Result<ArrayView2<'a, f64>, RoiError> {
        self.check_fits(frame.dim())?;
        Ok(frame.slice_move(s![self.y1..self.y2, self.x1..self.x2]))
    }

    /// Slice every frame of an `[N, H, W]` stack
    pub fn slice_stack<'a>(
        &self,
        stack: ArrayView3<'a, f64>,
    ) -> Result<ArrayView3<'a, f64>, RoiError> {
        let (_, height, width) = stack.dim();
        self.check_fits((height, width))?;
        Ok(stack.slice_move(s![.., self.y1..self.y2, self.x1..self.x2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_inverted_roi_is_rejected() {
        assert!(matches!(
            RegionOfInterest::new(5, 0, 5, 3),
            Err(RoiError::Inverted { .. })
        ));
        assert!(RegionOfInterest::new(0, 4, 2, 1).is_err());
    }

    #[test]
    fn test_slice_uses_rows_for_y() {
        let frame = Array::from_shape_fn((4, 6), |(r, c)| (10 * r + c) as f64);
        let roi = RegionOfInterest::new(1, 2, 4, 4).unwrap();
        let view = roi.slice_frame(frame.view()).unwrap();
        assert_eq!(view.dim(), (2, 3));
        assert_eq!(view[[0, 0]], 21.0);
        assert_eq!(roi.width(), 3);
        assert_eq!(roi.height(), 2);
    }

    #[test]
    fn test_out_of_bounds() {
        let stack = Array::<f64, _>::zeros((2, 4, 4));
        let roi = RegionOfInterest::new(0, 0, 5, 2).unwrap();
        assert_eq!(
            roi.slice_stack(stack.view()).unwrap_err(),
            RoiError::OutOfBounds {
                x2: 5,
                y2: 2,
                width: 4,
                height: 4
            }
        );
    }
}
