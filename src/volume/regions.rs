//! Connected components.

use crate::volume::Volume;

impl Volume {
    /// Label 6-connected above-zero components, keep the one with the
    /// greatest voxel count, zero the rest.
    pub fn keep_biggest_region(&mut self) {
        let (d1, d2, d3) = self.dims();
        let mut labels = vec![0u32; d1 * d2 * d3];
        let idx = |x: usize, y: usize, z: usize| (x * d2 + y) * d3 + z;

        let mut sizes: Vec<usize> = vec![0]; // label 0 = background
        let mut stack = Vec::new();

        for x in 0..d1 {
            for y in 0..d2 {
                for z in 0..d3 {
                    if self.data[(x, y, z)] <= 0.0 || labels[idx(x, y, z)] != 0 {
                        continue;
                    }
                    let label = sizes.len() as u32;
                    sizes.push(0);
                    stack.push((x, y, z));
                    labels[idx(x, y, z)] = label;

                    while let Some((cx, cy, cz)) = stack.pop() {
                        sizes[label as usize] += 1;
                        let neighbours = [
                            (cx.wrapping_sub(1), cy, cz),
                            (cx + 1, cy, cz),
                            (cx, cy.wrapping_sub(1), cz),
                            (cx, cy + 1, cz),
                            (cx, cy, cz.wrapping_sub(1)),
                            (cx, cy, cz + 1),
                        ];
                        for (nx, ny, nz) in neighbours {
                            if nx < d1
                                && ny < d2
                                && nz < d3
                                && self.data[(nx, ny, nz)] > 0.0
                                && labels[idx(nx, ny, nz)] == 0
                            {
                                labels[idx(nx, ny, nz)] = label;
                                stack.push((nx, ny, nz));
                            }
                        }
                    }
                }
            }
        }

        let biggest = sizes
            .iter()
            .enumerate()
            .skip(1)
            .max_by_key(|(_, &s)| s)
            .map(|(l, _)| l as u32)
            .unwrap_or(0);

        if biggest == 0 {
            return;
        }

        for x in 0..d1 {
            for y in 0..d2 {
                for z in 0..d3 {
                    if labels[idx(x, y, z)] != biggest {
                        self.data[(x, y, z)] = 0.0;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_largest_component() {
        let mut v = Volume::zeros(20, 20, 20);
        // large blob
        for x in 2..10 {
            for y in 2..10 {
                for z in 2..10 {
                    v.set(x, y, z, 1.0);
                }
            }
        }
        // small distant blob
        for x in 15..18 {
            for y in 15..18 {
                for z in 15..18 {
                    v.set(x, y, z, 1.0);
                }
            }
        }
        v.keep_biggest_region();
        assert_eq!(v.get(5, 5, 5), 1.0);
        assert_eq!(v.get(16, 16, 16), 0.0);
        assert_eq!(v.data.iter().filter(|&&x| x > 0.0).count(), 8 * 8 * 8);
    }

    #[test]
    fn empty_volume_is_left_alone() {
        let mut v = Volume::zeros(4, 4, 4);
        v.keep_biggest_region();
        assert!(v.data.iter().all(|&x| x == 0.0));
    }
}
