//! 骨骼管理器
//!
//! 持有模型的全部骨骼，并在 `build_hierarchy` 中预计算：
//! - 变形顺序（阶层 → 索引，同阶层内保证父先于子），以及物理前/物理后分段
//! - 父子、付与、IK 目标/链接的反向关系
//! - 每个骨骼的关联骨骼集合（单骨骼求值时使用）

use std::collections::{HashMap, HashSet, VecDeque};

use glam::DVec3;

use super::Bone;
use crate::{MmdError, Result};

/// 局部轴的 Z 基准（MMD 左手系中朝向画面内）
const UNIT_Z_NEG: DVec3 = DVec3::new(0.0, 0.0, -1.0);

/// 骨骼管理器
#[derive(Clone, Debug, Default)]
pub struct BoneManager {
    bones: Vec<Bone>,
    name_to_index: HashMap<String, usize>,
    /// 全部骨骼的变形顺序
    sorted_indices: Vec<usize>,
    before_physics_indices: Vec<usize>,
    after_physics_indices: Vec<usize>,
    /// 骨骼索引 -> 在变形顺序中的位置
    deform_rank: Vec<usize>,
    children: Vec<Vec<usize>>,
    effector_children: Vec<Vec<usize>>,
    /// 以该骨骼为目标的 IK 骨骼
    ik_targets: Vec<Vec<usize>>,
    /// 以该骨骼为链接的 IK 骨骼
    ik_links: Vec<Vec<usize>>,
    relative_indexes: Vec<Vec<usize>>,
    relative_indexes_without_ik: Vec<Vec<usize>>,
}

impl BoneManager {
    pub fn new() -> Self {
        Self {
            bones: Vec::new(),
            name_to_index: HashMap::new(),
            sorted_indices: Vec::new(),
            before_physics_indices: Vec::new(),
            after_physics_indices: Vec::new(),
            deform_rank: Vec::new(),
            children: Vec::new(),
            effector_children: Vec::new(),
            ik_targets: Vec::new(),
            ik_links: Vec::new(),
            relative_indexes: Vec::new(),
            relative_indexes_without_ik: Vec::new(),
        }
    }

    /// 添加骨骼，返回其索引
    pub fn add_bone(&mut self, mut bone: Bone) -> usize {
        let index = self.bones.len();
        bone.index = index;
        self.name_to_index.insert(bone.name.clone(), index);
        self.bones.push(bone);
        index
    }

    /// 构建骨骼层级
    ///
    /// 父骨骼或付与源越界、父子成环时返回 `InvalidModel`；
    /// IK 引用越界只记录警告，求解时跳过。
    pub fn build_hierarchy(&mut self) -> Result<()> {
        let bone_count = self.bones.len();
        self.validate()?;

        self.children = vec![Vec::new(); bone_count];
        self.effector_children = vec![Vec::new(); bone_count];
        self.ik_targets = vec![Vec::new(); bone_count];
        self.ik_links = vec![Vec::new(); bone_count];
        for bone in &self.bones {
            if let Some(parent) = bone.parent_index {
                self.children[parent].push(bone.index);
            }
            if let Some(effector) = bone.effect_index.filter(|_| bone.has_effector()) {
                self.effector_children[effector].push(bone.index);
            }
            if let Some(ik) = &bone.ik {
                if ik.target_index < bone_count {
                    self.ik_targets[ik.target_index].push(bone.index);
                }
                for link in ik.links.iter().filter(|l| l.bone_index < bone_count) {
                    self.ik_links[link.bone_index].push(bone.index);
                }
            }
        }

        self.sorted_indices = self.build_deform_order();
        self.deform_rank = vec![0; bone_count];
        for (rank, &index) in self.sorted_indices.iter().enumerate() {
            self.deform_rank[index] = rank;
        }
        let (after, before): (Vec<usize>, Vec<usize>) = self
            .sorted_indices
            .iter()
            .copied()
            .partition(|&i| self.bones[i].deform_after_physics);
        self.before_physics_indices = before;
        self.after_physics_indices = after;

        self.relative_indexes = (0..bone_count)
            .map(|i| self.collect_relative_indexes(i, true))
            .collect();
        self.relative_indexes_without_ik = (0..bone_count)
            .map(|i| self.collect_relative_indexes(i, false))
            .collect();

        log::debug!(
            "骨骼层级构建完成: {} 骨骼, 物理前 {}, 物理后 {}",
            bone_count,
            self.before_physics_indices.len(),
            self.after_physics_indices.len()
        );
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let bone_count = self.bones.len();
        for bone in &self.bones {
            if let Some(parent) = bone.parent_index {
                if parent >= bone_count || parent == bone.index {
                    return Err(MmdError::InvalidModel(format!(
                        "bone {} ({}) has invalid parent {}",
                        bone.index, bone.name, parent
                    )));
                }
            }
            if let Some(effector) = bone.effect_index {
                if effector >= bone_count {
                    return Err(MmdError::InvalidModel(format!(
                        "bone {} ({}) has invalid effector {}",
                        bone.index, bone.name, effector
                    )));
                }
            }
            if let Some(ik) = &bone.ik {
                if ik.target_index >= bone_count {
                    log::warn!("IK 骨骼 {} 的目标 {} 越界", bone.name, ik.target_index);
                }
                for link in ik.links.iter().filter(|l| l.bone_index >= bone_count) {
                    log::warn!("IK 骨骼 {} 的链接 {} 越界", bone.name, link.bone_index);
                }
            }
        }

        // 父子成环检测
        for bone in &self.bones {
            let mut current = bone.parent_index;
            let mut depth = 0;
            while let Some(parent) = current {
                depth += 1;
                if depth > bone_count {
                    return Err(MmdError::InvalidModel(format!(
                        "bone {} ({}) has cyclic parents",
                        bone.index, bone.name
                    )));
                }
                current = self.bones[parent].parent_index;
            }
        }
        Ok(())
    }

    /// 阶层 → 索引排序，同阶层内父骨骼排在子骨骼之前
    fn build_deform_order(&self) -> Vec<usize> {
        let mut base: Vec<usize> = (0..self.bones.len()).collect();
        base.sort_by_key(|&i| (self.bones[i].layer, i));

        let mut emitted = vec![false; self.bones.len()];
        let mut order = Vec::with_capacity(self.bones.len());
        for &index in &base {
            let mut chain = Vec::new();
            let mut current = Some(index);
            while let Some(i) = current {
                if emitted[i] || self.bones[i].layer != self.bones[index].layer {
                    break;
                }
                chain.push(i);
                current = self.bones[i].parent_index;
            }
            for &i in chain.iter().rev() {
                if !emitted[i] {
                    emitted[i] = true;
                    order.push(i);
                }
            }
        }
        order
    }

    /// 通过名称查找骨骼
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Bone> {
        self.find_bone_by_name(name)
            .and_then(|i| self.bones.get(i))
            .ok_or_else(|| MmdError::MissingBone(name.to_string()))
    }

    /// 获取骨骼数量
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// 获取骨骼
    pub fn get_bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// 全部骨骼的变形顺序
    pub fn sorted_indices(&self) -> &[usize] {
        &self.sorted_indices
    }

    /// 物理前 / 物理后分段的变形顺序
    pub fn layer_sorted_indices(&self, after_physics: bool) -> &[usize] {
        if after_physics {
            &self.after_physics_indices
        } else {
            &self.before_physics_indices
        }
    }

    pub fn deform_rank(&self, index: usize) -> Option<usize> {
        self.deform_rank.get(index).copied()
    }

    /// 按变形顺序排序
    pub fn sort_by_deform_order(&self, indexes: &mut [usize]) {
        indexes.sort_by_key(|&i| self.deform_rank(i).unwrap_or(usize::MAX));
    }

    pub fn children(&self, index: usize) -> &[usize] {
        self.children.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn effector_children(&self, index: usize) -> &[usize] {
        self.effector_children.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    /// 单骨骼求值所需的关联骨骼（已按变形顺序排序）
    pub fn relative_bone_indexes(&self, index: usize, include_ik: bool) -> &[usize] {
        let table = if include_ik {
            &self.relative_indexes
        } else {
            &self.relative_indexes_without_ik
        };
        table.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    /// 沿父、付与、IK 目标/链接及其反向关系做广度优先收集
    fn collect_relative_indexes(&self, start: usize, include_ik: bool) -> Vec<usize> {
        let bone_count = self.bones.len();
        let mut visited = vec![false; bone_count];
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(index) = queue.pop_front() {
            if index >= bone_count || visited[index] {
                continue;
            }
            visited[index] = true;
            out.push(index);

            let bone = &self.bones[index];
            queue.extend(bone.parent_index);
            if bone.has_effector() {
                queue.extend(bone.effect_index);
            }
            if include_ik {
                if let Some(ik) = &bone.ik {
                    queue.push_back(ik.target_index);
                    queue.extend(ik.links.iter().map(|l| l.bone_index));
                }
            }
            queue.extend(self.effector_children[index].iter().copied());
            if include_ik {
                queue.extend(self.ik_targets[index].iter().copied());
                queue.extend(self.ik_links[index].iter().copied());
            }
        }
        self.sort_by_deform_order(&mut out);
        out
    }

    /// 求值对象骨骼
    ///
    /// - 无名称：该分段（物理前或物理后）的全部骨骼
    /// - 有名称：各骨骼及其关联集合的并集，跨越两个分段，
    ///   物理前骨骼排在物理后骨骼之前
    ///
    /// 模型中不存在的名称被跳过。
    pub fn collect_bone_indexes(
        &self,
        bone_names: &[String],
        include_ik: bool,
        after_physics: bool,
    ) -> Vec<usize> {
        if bone_names.is_empty() {
            return self.layer_sorted_indices(after_physics).to_vec();
        }
        let mut set = HashSet::new();
        for name in bone_names {
            match self.find_bone_by_name(name) {
                Some(index) => {
                    set.insert(index);
                    set.extend(self.relative_bone_indexes(index, include_ik));
                }
                None => log::debug!("{}", MmdError::MissingBone(name.clone())),
            }
        }
        let mut indexes: Vec<usize> = set.into_iter().collect();
        indexes.sort_by_key(|&i| {
            let after = self.bones.get(i).map_or(true, |b| b.deform_after_physics);
            (after, self.deform_rank(i).unwrap_or(usize::MAX))
        });
        indexes
    }

    /// IK 骨骼、目标与各链接，以及它们的全部祖先
    pub fn ik_chain_indexes(&self, ik_index: usize) -> Vec<usize> {
        let mut set = HashSet::new();
        let Some(bone) = self.bones.get(ik_index) else {
            return Vec::new();
        };
        self.insert_with_parents(ik_index, &mut set);
        if let Some(effector) = bone.effect_index.filter(|_| bone.has_effector()) {
            self.insert_with_parents(effector, &mut set);
        }
        if let Some(ik) = &bone.ik {
            self.insert_with_parents(ik.target_index, &mut set);
            for link in &ik.links {
                self.insert_with_parents(link.bone_index, &mut set);
            }
        }
        let mut indexes: Vec<usize> = set.into_iter().collect();
        self.sort_by_deform_order(&mut indexes);
        indexes
    }

    fn insert_with_parents(&self, index: usize, set: &mut HashSet<usize>) {
        let mut current = Some(index);
        while let Some(i) = current.filter(|&i| i < self.bones.len()) {
            if !set.insert(i) {
                break;
            }
            current = self.bones[i].parent_index;
        }
    }

    /// 旋转变化后需要重算的骨骼
    ///
    /// 返回 (单位矩阵需重算：起点及其付与子孙, 全局矩阵需重算：前者及其全部子孙)，
    /// 均按变形顺序排列。
    pub fn affected_indexes(&self, start: usize) -> (Vec<usize>, Vec<usize>) {
        let bone_count = self.bones.len();
        let mut unit_flags = vec![false; bone_count];
        let mut queue = VecDeque::from([start]);
        let mut units = Vec::new();
        while let Some(index) = queue.pop_front() {
            if index >= bone_count || unit_flags[index] {
                continue;
            }
            unit_flags[index] = true;
            units.push(index);
            queue.extend(self.effector_children[index].iter().copied());
        }

        let mut global_flags = vec![false; bone_count];
        let mut globals = Vec::new();
        let mut queue: VecDeque<usize> = units.iter().copied().collect();
        while let Some(index) = queue.pop_front() {
            if global_flags[index] {
                continue;
            }
            global_flags[index] = true;
            globals.push(index);
            queue.extend(self.children[index].iter().copied());
        }

        self.sort_by_deform_order(&mut units);
        self.sort_by_deform_order(&mut globals);
        (units, globals)
    }

    /// 子方向：尾端骨骼方向，其次尾端偏移，否则 +X
    pub fn child_direction(&self, index: usize) -> DVec3 {
        let Some(bone) = self.bones.get(index) else {
            return DVec3::X;
        };
        if let Some(tail) = bone.tail_index.and_then(|i| self.bones.get(i)) {
            if let Some(dir) = (tail.position - bone.position).try_normalize() {
                return dir;
            }
        }
        bone.tail_position.try_normalize().unwrap_or(DVec3::X)
    }

    /// 局部轴 (X, Y, Z)
    ///
    /// X 轴优先取固定轴，其次显式局部 X 轴，否则子方向；
    /// Y = X × (0,0,-1)，Z = X × Y。
    pub fn local_axes(&self, index: usize) -> (DVec3, DVec3, DVec3) {
        let Some(bone) = self.bones.get(index) else {
            return (DVec3::X, DVec3::Y, UNIT_Z_NEG);
        };
        let x_axis = bone
            .fixed_axis
            .filter(|a| *a != DVec3::ZERO)
            .or(bone.local_axis_x.filter(|a| *a != DVec3::ZERO))
            .unwrap_or_else(|| self.child_direction(index))
            .try_normalize()
            .unwrap_or(DVec3::X);
        let y_axis = x_axis.cross(UNIT_Z_NEG);
        let y_axis = if y_axis.length() == 0.0 { DVec3::Y } else { y_axis };
        let z_axis = x_axis.cross(y_axis);
        let z_axis = if z_axis.length() == 0.0 { UNIT_Z_NEG } else { z_axis };
        (x_axis, y_axis, z_axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{Ik, IkLink};
    use pretty_assertions::assert_eq;

    /// 0 センター, 1 下半身, 2 左足, 3 左ひざ, 4 左足首, 5 左足ＩＫ, 6 髪(物理後)
    fn leg_manager() -> BoneManager {
        let mut manager = BoneManager::new();
        manager.add_bone(Bone::new("センター", DVec3::new(0.0, 8.0, 0.0)));
        manager.add_bone(Bone::new("下半身", DVec3::new(0.0, 12.0, 0.0)).with_parent(0));
        manager.add_bone(Bone::new("左足", DVec3::new(1.0, 10.0, 0.0)).with_parent(1));
        manager.add_bone(Bone::new("左ひざ", DVec3::new(1.0, 5.0, 0.0)).with_parent(2));
        manager.add_bone(Bone::new("左足首", DVec3::new(1.0, 1.0, 0.0)).with_parent(3));
        manager.add_bone(
            Bone::new("左足ＩＫ", DVec3::new(1.0, 1.0, 0.0))
                .with_layer(1)
                .with_ik(
                    Ik::new(4, 40, 2.0_f64.to_radians())
                        .with_link(IkLink::new(3).with_angle_limit(
                            DVec3::new(-std::f64::consts::PI, 0.0, 0.0),
                            DVec3::new(-0.5_f64.to_radians(), 0.0, 0.0),
                        ))
                        .with_link(IkLink::new(2)),
                ),
        );
        manager.add_bone(Bone::new("髪", DVec3::new(0.0, 16.0, 0.0)).with_parent(1).after_physics());
        manager
    }

    #[test]
    fn test_build_hierarchy_order() {
        let mut manager = leg_manager();
        assert!(manager.build_hierarchy().is_ok());
        assert_eq!(manager.sorted_indices(), &[0, 1, 2, 3, 4, 6, 5]);
        assert_eq!(manager.layer_sorted_indices(false), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(manager.layer_sorted_indices(true), &[6]);
        assert_eq!(manager.children(1), &[2, 6]);
        assert_eq!(manager.deform_rank(5), Some(6));
    }

    #[test]
    fn test_parent_first_within_layer() {
        let mut manager = BoneManager::new();
        manager.add_bone(Bone::new("子", DVec3::ZERO).with_parent(1));
        manager.add_bone(Bone::new("親", DVec3::ZERO));
        assert!(manager.build_hierarchy().is_ok());
        assert_eq!(manager.sorted_indices(), &[1, 0]);
    }

    #[test]
    fn test_invalid_parent() {
        let mut manager = BoneManager::new();
        manager.add_bone(Bone::new("a", DVec3::ZERO).with_parent(5));
        assert!(matches!(manager.build_hierarchy(), Err(MmdError::InvalidModel(_))));

        let mut cyclic = BoneManager::new();
        cyclic.add_bone(Bone::new("a", DVec3::ZERO).with_parent(1));
        cyclic.add_bone(Bone::new("b", DVec3::ZERO).with_parent(0));
        assert!(matches!(cyclic.build_hierarchy(), Err(MmdError::InvalidModel(_))));
    }

    #[test]
    fn test_get_by_name() {
        let mut manager = leg_manager();
        assert!(manager.build_hierarchy().is_ok());
        assert_eq!(manager.get_by_name("左ひざ").map(|b| b.index), Ok(3));
        assert_eq!(
            manager.get_by_name("右ひざ").err(),
            Some(MmdError::MissingBone("右ひざ".to_string()))
        );
    }

    #[test]
    fn test_relative_indexes() {
        let mut manager = leg_manager();
        assert!(manager.build_hierarchy().is_ok());
        // 足首 → IK 目标的反向关系把 IK 骨骼和链接一起带入
        assert_eq!(manager.relative_bone_indexes(4, true), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(manager.relative_bone_indexes(4, false), &[0, 1, 2, 3, 4]);

        let names = vec!["髪".to_string(), "無い".to_string()];
        assert_eq!(manager.collect_bone_indexes(&names, true, false), vec![0, 1, 6]);
        assert_eq!(manager.collect_bone_indexes(&names, true, true), vec![0, 1, 6]);
    }

    #[test]
    fn test_collect_bone_indexes_by_segment() {
        let mut manager = leg_manager();
        assert!(manager.build_hierarchy().is_ok());
        assert_eq!(manager.collect_bone_indexes(&[], true, false), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(manager.collect_bone_indexes(&[], true, true), vec![6]);
    }

    #[test]
    fn test_collect_named_after_physics_bone_with_parents() {
        let mut manager = BoneManager::new();
        manager.add_bone(Bone::new("全ての親", DVec3::ZERO));
        manager.add_bone(Bone::new("A", DVec3::ZERO).with_parent(0).with_layer(1).after_physics());
        manager.add_bone(
            Bone::new("B", DVec3::new(1.0, 0.0, 0.0)).with_parent(1).with_layer(1).after_physics(),
        );
        manager.add_bone(Bone::new("前", DVec3::ZERO).with_layer(2));
        assert!(manager.build_hierarchy().is_ok());

        let names = vec!["B".to_string()];
        assert_eq!(manager.collect_bone_indexes(&names, true, true), vec![0, 1, 2]);
        assert_eq!(manager.collect_bone_indexes(&[], true, false), vec![0, 3]);
        assert_eq!(manager.collect_bone_indexes(&[], true, true), vec![1, 2]);
    }

    #[test]
    fn test_ik_chain_indexes() {
        let mut manager = leg_manager();
        assert!(manager.build_hierarchy().is_ok());
        assert_eq!(manager.ik_chain_indexes(5), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_affected_indexes() {
        let mut manager = leg_manager();
        manager.add_bone(Bone::new("左足D", DVec3::new(1.0, 10.0, 0.0)).with_effector(2, 1.0, true, false));
        assert!(manager.build_hierarchy().is_ok());
        let (units, globals) = manager.affected_indexes(2);
        assert_eq!(units, vec![2, 7]);
        assert_eq!(globals, vec![2, 3, 4, 7]);
    }

    #[test]
    fn test_local_axes() {
        let mut manager = BoneManager::new();
        manager.add_bone(Bone::new("腕", DVec3::ZERO).with_tail_index(1));
        manager.add_bone(Bone::new("ひじ", DVec3::new(2.0, 0.0, 0.0)).with_parent(0));
        manager.add_bone(Bone::new("捩", DVec3::ZERO).with_fixed_axis(DVec3::new(0.0, 3.0, 0.0)));
        assert!(manager.build_hierarchy().is_ok());

        let (x, y, z) = manager.local_axes(0);
        assert_eq!(x, DVec3::X);
        assert_eq!(y, DVec3::new(0.0, 1.0, 0.0));
        assert_eq!(z, DVec3::new(0.0, 0.0, 1.0));

        let (x, _, _) = manager.local_axes(2);
        assert_eq!(x, DVec3::Y);
        // 无尾端时子方向为 +X
        assert_eq!(manager.child_direction(1), DVec3::X);
    }
}
