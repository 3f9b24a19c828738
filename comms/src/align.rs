/// Element types a receive buffer may be made of.
///
/// Every implementor is plain old data with an alignment of at least 4 bytes, so the
/// entry arrays of a received update start on an aligned boundary.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for f32 {}
impl Align4 for u64 {}
impl Align4 for f64 {}
