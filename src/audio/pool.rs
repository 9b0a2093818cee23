//! 可复用实例池
//!
//! 解码器和重采样器构造代价高，按构造参数（key）缓存空闲实例。
//! 每个 actor 独占自己的池（`Rc<RefCell<…>>`，不跨线程），
//! 借出通过 RAII 的 `Lease` 表达：drop 时自动 reset 并归还，
//! 重复释放和释放后使用在类型层面无法写出。

use crate::error::{AudioError, AudioResult};
use crate::tools::constants::pool as pool_consts;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// 可被池复用的资源
pub trait Reusable {
    /// 归还时调用：回到可再次借出的干净状态
    fn reset(&mut self);

    /// 借出时调用
    fn on_lend(&mut self) {}
}

impl<T: Reusable + ?Sized> Reusable for Box<T> {
    fn reset(&mut self) {
        (**self).reset()
    }

    fn on_lend(&mut self) {
        (**self).on_lend()
    }
}

struct PoolSlot<T> {
    idle: Vec<T>,
    allocated: usize,
}

struct PoolInner<K, T> {
    slots: HashMap<K, PoolSlot<T>>,
    ceiling: usize,
    preallocate: usize,
}

/// 池正被借用时归还的实例，下次访问池时收回
type Deferred<K, T> = Rc<RefCell<Vec<(K, T)>>>;

/// 按 key 分桶的实例池
pub struct ResourcePool<K, T> {
    inner: Rc<RefCell<PoolInner<K, T>>>,
    deferred: Deferred<K, T>,
}

impl<K, T> Clone for ResourcePool<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            deferred: Rc::clone(&self.deferred),
        }
    }
}

impl<K, T> Default for ResourcePool<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Reusable,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> ResourcePool<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Reusable,
{
    pub fn new() -> Self {
        Self::with_limits(pool_consts::PREALLOCATE, pool_consts::CEILING)
    }

    pub fn with_limits(preallocate: usize, ceiling: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                slots: HashMap::new(),
                ceiling: ceiling.max(1),
                preallocate: preallocate.min(ceiling),
            })),
            deferred: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// 收回延迟归还的实例
    fn reclaim(&self) {
        let returned: Vec<(K, T)> = self.deferred.borrow_mut().drain(..).collect();
        if returned.is_empty() {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        for (key, item) in returned {
            if let Some(slot) = inner.slots.get_mut(&key) {
                slot.idle.push(item);
            }
        }
    }

    /// 借出一个实例；没有空闲实例时用 `factory` 构造
    pub fn alloc<F>(&self, key: K, mut factory: F) -> AudioResult<Lease<K, T>>
    where
        F: FnMut() -> AudioResult<T>,
    {
        self.reclaim();
        let mut inner = self.inner.borrow_mut();
        let ceiling = inner.ceiling;
        let preallocate = inner.preallocate;

        if !inner.slots.contains_key(&key) {
            let mut idle = Vec::with_capacity(preallocate);
            for _ in 0..preallocate {
                idle.push(factory()?);
            }
            let allocated = idle.len();
            inner
                .slots
                .insert(key.clone(), PoolSlot { idle, allocated });
        }

        let Some(slot) = inner.slots.get_mut(&key) else {
            return Err(AudioError::InvalidInput(format!("资源池缺少 {key:?}")));
        };
        let mut item = match slot.idle.pop() {
            Some(item) => item,
            None => {
                if slot.allocated >= ceiling {
                    tracing::warn!("资源池 {key:?} 已分配 {} 个实例，拒绝继续分配", slot.allocated);
                    return Err(AudioError::PoolExhausted {
                        key: format!("{key:?}"),
                        allocated: slot.allocated + 1,
                    });
                }
                let item = factory()?;
                slot.allocated += 1;
                item
            }
        };
        item.on_lend();

        Ok(Lease {
            key,
            item: Some(item),
            pool: Rc::clone(&self.inner),
            deferred: Rc::clone(&self.deferred),
        })
    }

    /// 某个 key 当前空闲的实例数
    pub fn idle_count(&self, key: &K) -> usize {
        self.reclaim();
        self.inner
            .borrow()
            .slots
            .get(key)
            .map_or(0, |s| s.idle.len())
    }

    /// 某个 key 已经构造过的实例总数
    pub fn allocated_count(&self, key: &K) -> usize {
        self.inner
            .borrow()
            .slots
            .get(key)
            .map_or(0, |s| s.allocated)
    }
}

/// 借出的实例；drop 时 reset 并归还到池中
pub struct Lease<K, T>
where
    K: Eq + Hash + Clone,
    T: Reusable,
{
    key: K,
    item: Option<T>,
    pool: Rc<RefCell<PoolInner<K, T>>>,
    deferred: Deferred<K, T>,
}

impl<K: Eq + Hash + Clone, T: Reusable> Lease<K, T> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone, T: Reusable> Deref for Lease<K, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // item 只在 drop 中被取走
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<K: Eq + Hash + Clone, T: Reusable> DerefMut for Lease<K, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<K: Eq + Hash + Clone, T: Reusable> Drop for Lease<K, T> {
    fn drop(&mut self) {
        let Some(mut item) = self.item.take() else {
            return;
        };
        item.reset();
        match self.pool.try_borrow_mut() {
            Ok(mut inner) => {
                if let Some(slot) = inner.slots.get_mut(&self.key) {
                    slot.idle.push(item);
                }
            }
            // alloc 的 factory 中释放租约时池仍被借用
            Err(_) => match self.deferred.try_borrow_mut() {
                Ok(mut deferred) => deferred.push((self.key.clone(), item)),
                Err(_) => tracing::warn!("资源池被占用，实例无法归还，已丢弃"),
            },
        }
    }
}

/// 暂存缓冲的用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchRole {
    /// 声道混合输出
    Mix,
    /// 指纹单声道输入
    Fingerprint,
}

/// 每个任务独享的暂存缓冲，按（用途, 声道数, 长度）复用
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    slots: HashMap<(ScratchRole, usize, usize), Vec<Vec<f32>>>,
}

impl ScratchBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出 `channels` 个长度为 `size` 的平面缓冲（首次分配时为零）
    pub fn planar(&mut self, role: ScratchRole, channels: usize, size: usize) -> &mut [Vec<f32>] {
        self.slots
            .entry((role, channels, size))
            .or_insert_with(|| vec![vec![0.0; size]; channels])
    }

    /// 暂存缓冲占用的样本总数
    pub fn total_samples(&self) -> usize {
        self.slots
            .values()
            .flat_map(|chs| chs.iter().map(Vec::len))
            .sum()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
