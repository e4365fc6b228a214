//! Change sources: host-owned holders of one geometry value.
//!
//! A [`Source<T>`] wraps a shape behind a mutex. Typed setters replace
//! the value and notify the bound observer (the engine) with the
//! source's identity key. The observer side holds only weak references,
//! so dropping the last host `Arc` is how an object leaves the scene.

use std::sync::{Arc, Weak};

use foundation::math::{Quat, Vec2, Vec3};
use parking_lot::Mutex;

use crate::geometry::{
    Ball, Box2, Box3, Circle, Dim, Geometry2D, Geometry3D, GeometryValue, Point2, Point3, Polygon,
    Polyline, Pose2, Pose3, Shape, Trajectory,
};

/// Identity of a source for the lifetime of its allocation.
///
/// Derived from the source's address; stable while anyone (including a
/// weak holder) still references the allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey(usize);

/// Receiver of change notifications. Implemented by the engine.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, key: SourceKey);
}

pub struct Source<T: Shape> {
    value: Mutex<T>,
    observer: Mutex<Option<Weak<dyn ChangeObserver>>>,
}

impl<T: Shape> Source<T> {
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            observer: Mutex::new(None),
        })
    }

    /// Snapshot of the current shape.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Replace the whole shape and notify.
    pub fn set(&self, value: T) {
        self.apply(|v| *v = value);
    }

    fn apply(&self, f: impl FnOnce(&mut T)) {
        {
            let mut value = self.value.lock();
            f(&mut value);
        }
        // Value lock released above: the observer takes the registry
        // lock, and flushes read the value while holding it.
        self.notify();
    }

    fn notify(&self) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer.and_then(|weak| weak.upgrade()) {
            observer.on_change(self.key_of());
        }
    }

    fn key_of(&self) -> SourceKey {
        SourceKey(self as *const Self as *const () as usize)
    }
}

/// Object-safe view of a [`Source`] used by the tracking side.
pub trait GeometrySource: Send + Sync {
    fn snapshot(&self) -> GeometryValue;
    fn dim(&self) -> Dim;
    fn key(&self) -> SourceKey;
    /// Install an observer back-reference, replacing any prior one.
    fn bind(&self, observer: Weak<dyn ChangeObserver>);
    /// Clear the back-reference, but only if it still points at
    /// `observer`; a later binder keeps its claim.
    fn unbind(&self, observer: &Weak<dyn ChangeObserver>);
}

impl<T: Shape> GeometrySource for Source<T> {
    fn snapshot(&self) -> GeometryValue {
        self.value.lock().clone().into_value()
    }

    fn dim(&self) -> Dim {
        T::DIM
    }

    fn key(&self) -> SourceKey {
        self.key_of()
    }

    fn bind(&self, observer: Weak<dyn ChangeObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn unbind(&self, observer: &Weak<dyn ChangeObserver>) {
        let mut slot = self.observer.lock();
        if let Some(current) = slot.as_ref() {
            if same_observer(current, observer) {
                *slot = None;
            }
        }
    }
}

// Compare data pointers only; vtable pointers are not stable across
// codegen units.
fn same_observer(a: &Weak<dyn ChangeObserver>, b: &Weak<dyn ChangeObserver>) -> bool {
    a.as_ptr() as *const () == b.as_ptr() as *const ()
}

fn erase<T: Shape>(source: Arc<Source<T>>) -> Arc<dyn GeometrySource> {
    source
}

/// Clone a bare geometry value into a fresh, unbound source.
pub fn source_from_value(value: GeometryValue) -> Arc<dyn GeometrySource> {
    match value {
        GeometryValue::D2(Geometry2D::Point(s)) => erase(Source::new(s)),
        GeometryValue::D2(Geometry2D::Pose(s)) => erase(Source::new(s)),
        GeometryValue::D2(Geometry2D::Circle(s)) => erase(Source::new(s)),
        GeometryValue::D2(Geometry2D::Box(s)) => erase(Source::new(s)),
        GeometryValue::D2(Geometry2D::Polyline(s)) => erase(Source::new(s)),
        GeometryValue::D2(Geometry2D::Trajectory(s)) => erase(Source::new(s)),
        GeometryValue::D2(Geometry2D::Polygon(s)) => erase(Source::new(s)),
        GeometryValue::D3(Geometry3D::Point(s)) => erase(Source::new(s)),
        GeometryValue::D3(Geometry3D::Pose(s)) => erase(Source::new(s)),
        GeometryValue::D3(Geometry3D::Ball(s)) => erase(Source::new(s)),
        GeometryValue::D3(Geometry3D::Box(s)) => erase(Source::new(s)),
    }
}

impl Source<Point2> {
    pub fn set_position(&self, pos: Vec2) {
        self.apply(|p| p.pos = pos);
    }
}

impl Source<Pose2> {
    pub fn set_position(&self, pos: Vec2) {
        self.apply(|p| p.pos = pos);
    }

    pub fn set_angle(&self, theta: f32) {
        self.apply(|p| p.theta = theta);
    }

    pub fn set_pose(&self, pos: Vec2, theta: f32) {
        self.apply(|p| {
            p.pos = pos;
            p.theta = theta;
        });
    }
}

impl Source<Circle> {
    pub fn set_center(&self, center: Vec2) {
        self.apply(|c| c.center = center);
    }

    pub fn set_radius(&self, radius: f32) {
        self.apply(|c| c.radius = radius);
    }
}

impl Source<Box2> {
    pub fn set_center(&self, center: Pose2) {
        self.apply(|b| b.center = center);
    }

    pub fn set_width(&self, width: f32) {
        self.apply(|b| b.width = width);
    }

    pub fn set_length_front(&self, len: f32) {
        self.apply(|b| b.len_front = len);
    }

    pub fn set_length_rear(&self, len: f32) {
        self.apply(|b| b.len_rear = len);
    }
}

impl Source<Polyline> {
    pub fn set_points(&self, points: Vec<Vec2>) {
        self.apply(|l| l.points = points);
    }

    pub fn push_point(&self, point: Vec2) {
        self.apply(|l| l.points.push(point));
    }

    pub fn clear_points(&self) {
        self.apply(|l| l.points.clear());
    }
}

impl Source<Trajectory> {
    pub fn set_boxes(&self, boxes: Vec<Box2>) {
        self.apply(|t| t.boxes = boxes);
    }

    pub fn push_box(&self, b: Box2) {
        self.apply(|t| t.boxes.push(b));
    }

    pub fn clear_boxes(&self) {
        self.apply(|t| t.boxes.clear());
    }
}

impl Source<Polygon> {
    pub fn set_vertices(&self, vertices: Vec<Vec2>) {
        self.apply(|p| p.vertices = vertices);
    }

    pub fn push_vertex(&self, vertex: Vec2) {
        self.apply(|p| p.vertices.push(vertex));
    }

    pub fn clear_vertices(&self) {
        self.apply(|p| p.vertices.clear());
    }
}

impl Source<Point3> {
    pub fn set_position(&self, pos: Vec3) {
        self.apply(|p| p.pos = pos);
    }
}

impl Source<Pose3> {
    pub fn set_position(&self, pos: Vec3) {
        self.apply(|p| p.pos = pos);
    }

    pub fn set_orientation(&self, quat: Quat) {
        self.apply(|p| p.quat = quat);
    }

    pub fn set_pose(&self, pos: Vec3, quat: Quat) {
        self.apply(|p| {
            p.pos = pos;
            p.quat = quat;
        });
    }
}

impl Source<Ball> {
    pub fn set_center(&self, center: Vec3) {
        self.apply(|b| b.center = center);
    }

    pub fn set_radius(&self, radius: f32) {
        self.apply(|b| b.radius = radius);
    }
}

impl Source<Box3> {
    pub fn set_center(&self, center: Pose3) {
        self.apply(|b| b.center = center);
    }

    pub fn set_lengths(&self, x: f32, y: f32, z: f32) {
        self.apply(|b| {
            b.x_len = x;
            b.y_len = y;
            b.z_len = z;
        });
    }
}
