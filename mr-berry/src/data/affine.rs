//! 体素坐标到物理空间 (RAS+, 毫米) 的仿射变换.
//!
//! 这里的轴编号始终是 nifti 的 `(i, j, k)` 次序, 即 `[W, H, z]`.
//! 与之相对, 体数据数组按 `(z, H, W)` 存储, 转换时需要反转轴序.

use nifti::NiftiHeader;

/// 3x4 仿射矩阵. 第 `j` 列 (`j < 3`) 是第 `j` 个体素轴的方向乘以体素间距,
/// 第 4 列是原点.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine(pub [[f64; 4]; 3]);

/// 解析方向编码错误.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AxisCodeError {
    /// 线性部分奇异, 无法确定方向.
    Singular,
}

impl Affine {
    /// 对角仿射, 原点为零. `spacing` 按 `[i, j, k]` 次序给出.
    pub fn diagonal(spacing: [f64; 3]) -> Self {
        let mut m = [[0.0; 4]; 3];
        for (i, s) in spacing.iter().enumerate() {
            m[i][i] = *s;
        }
        Self(m)
    }

    /// 从 header 解析仿射.
    ///
    /// 优先使用 sform; 其次使用 qform; 两者都不可用时, 退化为按 `pixdim` 缩放的对角矩阵.
    pub fn from_header(h: &NiftiHeader) -> Self {
        if h.sform_code > 0 {
            let mut m = [[0.0; 4]; 3];
            for (row, src) in m.iter_mut().zip([h.srow_x, h.srow_y, h.srow_z]) {
                for (dst, v) in row.iter_mut().zip(src) {
                    *dst = v as f64;
                }
            }
            return Self(m);
        }
        let [_, di, dj, dk, ..] = h.pixdim;
        let spacing = [di as f64, dj as f64, dk as f64].map(|s| if s > 0.0 { s } else { 1.0 });
        if h.qform_code > 0 {
            return Self::from_quatern(h, spacing);
        }
        Self::diagonal(spacing)
    }

    /// 由 qform 四元数构造仿射.
    fn from_quatern(h: &NiftiHeader, [di, dj, dk]: [f64; 3]) -> Self {
        let (mut b, mut c, mut d) = (h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64);
        let sq = b * b + c * c + d * d;
        // 180 度旋转时 `a` 只剩下 f32 舍入噪声, 按 nifti 参考实现归一化.
        let a = if 1.0 - sq < 1e-7 {
            let n = sq.sqrt();
            (b, c, d) = (b / n, c / n, d / n);
            0.0
        } else {
            (1.0 - sq).sqrt()
        };
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let offset = [h.quatern_x as f64, h.quatern_y as f64, h.quatern_z as f64];
        let mut m = [[0.0; 4]; 3];
        for i in 0..3 {
            m[i][0] = r[i][0] * di;
            m[i][1] = r[i][1] * dj;
            m[i][2] = r[i][2] * dk * qfac;
            m[i][3] = offset[i];
        }
        Self(m)
    }

    /// 第 `j` 个体素轴对应的列向量.
    #[inline]
    pub fn column(&self, j: usize) -> [f64; 3] {
        [self.0[0][j], self.0[1][j], self.0[2][j]]
    }

    /// 原点.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.column(3)
    }

    /// 每个体素轴的间距 (列向量长度).
    pub fn spacing(&self) -> [f64; 3] {
        [0, 1, 2].map(|j| norm(self.column(j)))
    }

    /// 按体素索引平移原点: `origin += Σ shift[j] * column[j]`.
    pub fn translated(&self, shift: [f64; 3]) -> Self {
        let mut m = self.0;
        for (j, s) in shift.iter().enumerate() {
            for row in m.iter_mut() {
                row[3] += row[j] * s;
            }
        }
        Self(m)
    }

    /// 将每一列按 `factor[j]` 缩放, 原点不变.
    pub fn scaled(&self, factor: [f64; 3]) -> Self {
        let mut m = self.0;
        for row in m.iter_mut() {
            for (j, f) in factor.iter().enumerate() {
                row[j] *= f;
            }
        }
        Self(m)
    }

    /// 体素坐标 `[i, j, k]` 映射到世界坐标.
    pub fn apply(&self, ijk: [f64; 3]) -> [f64; 3] {
        self.0
            .map(|row| row[0] * ijk[0] + row[1] * ijk[1] + row[2] * ijk[2] + row[3])
    }

    /// 逆仿射 (世界坐标到体素坐标). 线性部分奇异时返回 `None`.
    pub fn inverse(&self) -> Option<Affine> {
        let m = &self.0;
        let c = |i: usize, j: usize| m[i][j];
        let det = c(0, 0) * (c(1, 1) * c(2, 2) - c(1, 2) * c(2, 1))
            - c(0, 1) * (c(1, 0) * c(2, 2) - c(1, 2) * c(2, 0))
            + c(0, 2) * (c(1, 0) * c(2, 1) - c(1, 1) * c(2, 0));
        if det.abs() <= f64::EPSILON {
            return None;
        }
        // 伴随矩阵 / 行列式.
        let mut inv = [[0.0; 4]; 3];
        for i in 0..3 {
            for j in 0..3 {
                let (r0, r1) = ((j + 1) % 3, (j + 2) % 3);
                let (c0, c1) = ((i + 1) % 3, (i + 2) % 3);
                inv[i][j] = (c(r0, c0) * c(r1, c1) - c(r0, c1) * c(r1, c0)) / det;
            }
        }
        let t = self.origin();
        for row in inv.iter_mut() {
            row[3] = -(row[0] * t[0] + row[1] * t[1] + row[2] * t[2]);
        }
        Some(Affine(inv))
    }

    /// 求每个体素轴所指向的主导世界轴以及方向 (nibabel 风格的贪心匹配).
    ///
    /// 返回值第 `j` 个元素为 `(world_axis, positive)`.
    pub fn orientation(&self) -> Result<[(usize, bool); 3], AxisCodeError> {
        let mut used_world = [false; 3];
        let mut used_voxel = [false; 3];
        let mut ans = [(usize::MAX, true); 3];
        for _ in 0..3 {
            let mut best: Option<(usize, usize, f64)> = None;
            for (i, _) in used_world.iter().enumerate().filter(|(_, u)| !**u) {
                for (j, _) in used_voxel.iter().enumerate().filter(|(_, u)| !**u) {
                    let v = self.0[i][j].abs();
                    if best.map_or(true, |(_, _, b)| v > b) {
                        best = Some((i, j, v));
                    }
                }
            }
            let (i, j, v) = best.ok_or(AxisCodeError::Singular)?;
            if v <= f64::EPSILON {
                return Err(AxisCodeError::Singular);
            }
            used_world[i] = true;
            used_voxel[j] = true;
            ans[j] = (i, self.0[i][j] > 0.0);
        }
        Ok(ans)
    }

    /// 方向编码, 例如 `"RAS"`, `"LPS"`.
    pub fn axcodes(&self) -> Result<String, AxisCodeError> {
        const POS: [char; 3] = ['R', 'A', 'S'];
        const NEG: [char; 3] = ['L', 'P', 'I'];
        Ok(self
            .orientation()?
            .iter()
            .map(|&(i, pos)| if pos { POS[i] } else { NEG[i] })
            .collect())
    }

    /// 将仿射写回 header. sform 与 qform 同时更新, `pixdim` 同步为列向量长度.
    pub fn write_to_header(&self, h: &mut NiftiHeader) {
        let m = &self.0;
        h.srow_x = m[0].map(|v| v as f32);
        h.srow_y = m[1].map(|v| v as f32);
        h.srow_z = m[2].map(|v| v as f32);
        if h.sform_code <= 0 {
            h.sform_code = 2; // aligned
        }

        let spacing = self.spacing();
        for (j, s) in spacing.iter().enumerate() {
            h.pixdim[j + 1] = *s as f32;
        }

        // 旋转部分: 列归一化, 行列式为负时翻转第三列并记入 qfac.
        let mut r = [[0.0; 3]; 3];
        for (j, s) in spacing.iter().enumerate() {
            let s = if *s > 0.0 { *s } else { 1.0 };
            for i in 0..3 {
                r[i][j] = m[i][j] / s;
            }
        }
        let det = r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
            - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
            + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0]);
        let qfac = if det < 0.0 {
            for row in r.iter_mut() {
                row[2] = -row[2];
            }
            -1.0
        } else {
            1.0
        };
        let [b, c, d] = rotation_to_quatern(&r);
        h.pixdim[0] = qfac;
        h.quatern_b = b as f32;
        h.quatern_c = c as f32;
        h.quatern_d = d as f32;
        let [ox, oy, oz] = self.origin();
        (h.quatern_x, h.quatern_y, h.quatern_z) = (ox as f32, oy as f32, oz as f32);
        if h.qform_code <= 0 {
            h.qform_code = h.sform_code;
        }
    }
}

#[inline]
fn norm([x, y, z]: [f64; 3]) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

/// 正交旋转矩阵转四元数 `(b, c, d)`, 保证 `a >= 0`.
fn rotation_to_quatern(r: &[[f64; 3]; 3]) -> [f64; 3] {
    let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
    let (a, b, c, d);
    if trace > 0.5 {
        let a0 = 0.5 * trace.sqrt();
        a = a0;
        b = 0.25 * (r[2][1] - r[1][2]) / a0;
        c = 0.25 * (r[0][2] - r[2][0]) / a0;
        d = 0.25 * (r[1][0] - r[0][1]) / a0;
    } else {
        let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
        let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
        let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);
        if xd > 1.0 {
            let b0 = 0.5 * xd.sqrt();
            b = b0;
            c = 0.25 * (r[0][1] + r[1][0]) / b0;
            d = 0.25 * (r[0][2] + r[2][0]) / b0;
            a = 0.25 * (r[2][1] - r[1][2]) / b0;
        } else if yd > 1.0 {
            let c0 = 0.5 * yd.sqrt();
            c = c0;
            b = 0.25 * (r[0][1] + r[1][0]) / c0;
            d = 0.25 * (r[1][2] + r[2][1]) / c0;
            a = 0.25 * (r[0][2] - r[2][0]) / c0;
        } else {
            let d0 = 0.5 * zd.sqrt();
            d = d0;
            b = 0.25 * (r[0][2] + r[2][0]) / d0;
            c = 0.25 * (r[1][2] + r[2][1]) / d0;
            a = 0.25 * (r[1][0] - r[0][1]) / d0;
        }
    }
    if a < 0.0 {
        [-b, -c, -d]
    } else {
        [b, c, d]
    }
}
