// A Slab contains the data for a slab header and an array of nodes of a critbit tree
// whose leafs contain the data referencing an order of the orderbook.
use bytemuck::{Pod, Zeroable};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use solana_program::pubkey::Pubkey;

use super::{
    check_len, load, parse_flags, AccountFlag, Side, ACCOUNT_HEAD_PADDING, ACCOUNT_TAIL_PADDING,
};
use crate::error::DecodeError;

pub type NodeHandle = u32;

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct SlabHeader {
    head_padding: [u8; 5],
    account_flags: [u8; 8],
    bump_index: [u8; 4],
    _padding0: [u8; 4],
    free_list_len: [u8; 4],
    _padding1: [u8; 4],
    free_list_head: [u8; 4],
    root_node: [u8; 4],
    leaf_count: [u8; 4],
    _padding2: [u8; 4],
}

impl SlabHeader {
    const LEN: usize = std::mem::size_of::<Self>();
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct InnerNode {
    tag: [u8; 4],
    prefix_len: [u8; 4],
    key: [u8; 16],
    children: [[u8; 4]; 2],
    _padding0: [u8; 32],
    _padding1: [u8; 8],
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct LeafNode {
    tag: [u8; 4],
    owner_slot: u8,
    fee_tier: u8,
    _padding: [u8; 2],
    key: [u8; 16],
    owner: [u8; 32],
    quantity: [u8; 8],
    client_order_id: [u8; 8],
}

/// Size of every node of the slab, whatever its tag
pub const NODE_LEN: usize = std::mem::size_of::<LeafNode>();

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
enum NodeTag {
    Uninitialized = 0,
    Inner = 1,
    Leaf = 2,
    Free = 3,
    LastFree = 4,
}

/// A resting order decoded from a slab leaf
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlabOrder {
    /// The key is the associated order id
    pub order_id: u128,
    /// Price in quote lots per base lot
    pub price: u64,
    /// Remaining size in base lots
    pub quantity: u64,
    /// Open orders account holding the order
    pub owner: Pubkey,
    /// Slot of the order inside its open orders account
    pub owner_slot: u8,
    pub fee_tier: u8,
    pub client_order_id: u64,
    /// Matching engine sequence number, lower is older
    pub sequence_number: u64,
}

/// A decoded, immutable snapshot of one side of the book.
///
/// Orders are stored in tree order, which is price ascending. Use [`OrderBookSide::sorted`] for display order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBookSide {
    side: Side,
    orders: Vec<SlabOrder>,
}

struct SlabView<'a> {
    header: &'a SlabHeader,
    nodes: &'a [u8],
}

impl<'a> SlabView<'a> {
    fn node_count(&self) -> usize {
        self.nodes.len() / NODE_LEN
    }

    fn node(&self, handle: NodeHandle) -> Result<(NodeTag, &'a [u8]), DecodeError> {
        let h = handle as usize;
        if h >= self.node_count() {
            return Err(DecodeError::NodeHandleOutOfBounds(handle));
        }
        let bytes = &self.nodes[h * NODE_LEN..(h + 1) * NODE_LEN];
        let raw_tag = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let tag = NodeTag::try_from(raw_tag).map_err(|_| DecodeError::InvalidNodeTag {
            handle,
            tag: raw_tag,
        })?;
        Ok((tag, bytes))
    }

    fn leaf_count(&self) -> u32 {
        u32::from_le_bytes(self.header.leaf_count)
    }

    fn root(&self) -> Option<NodeHandle> {
        if self.leaf_count() == 0 {
            None
        } else {
            Some(u32::from_le_bytes(self.header.root_node))
        }
    }

    /// In order walk of the tree, smallest key first
    fn walk(&self, side: Side) -> Result<Vec<SlabOrder>, DecodeError> {
        let mut orders = Vec::with_capacity(self.leaf_count() as usize);
        let mut search_stack: Vec<NodeHandle> = self.root().into_iter().collect();
        let mut visited = 0usize;
        while let Some(current) = search_stack.pop() {
            visited += 1;
            if visited > self.node_count() {
                return Err(DecodeError::MalformedTree);
            }
            match self.node(current)? {
                (NodeTag::Inner, bytes) => {
                    let n: &InnerNode = bytemuck::from_bytes(bytes);
                    search_stack.push(u32::from_le_bytes(n.children[1]));
                    search_stack.push(u32::from_le_bytes(n.children[0]));
                }
                (NodeTag::Leaf, bytes) => {
                    let leaf: &LeafNode = bytemuck::from_bytes(bytes);
                    let order_id = u128::from_le_bytes(leaf.key);
                    orders.push(SlabOrder {
                        order_id,
                        price: (order_id >> 64) as u64,
                        quantity: u64::from_le_bytes(leaf.quantity),
                        owner: Pubkey::new_from_array(leaf.owner),
                        owner_slot: leaf.owner_slot,
                        fee_tier: leaf.fee_tier,
                        client_order_id: u64::from_le_bytes(leaf.client_order_id),
                        sequence_number: side.sequence_number(order_id),
                    });
                }
                (tag, _) => {
                    return Err(DecodeError::InvalidNodeTag {
                        handle: current,
                        tag: tag.into(),
                    })
                }
            }
        }
        if orders.len() != self.leaf_count() as usize {
            return Err(DecodeError::MalformedTree);
        }
        Ok(orders)
    }
}

impl OrderBookSide {
    /// Decode a bids or asks account. The side is read from the account flags.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        check_len(buf, SlabHeader::LEN + ACCOUNT_TAIL_PADDING.len())?;
        let header = load::<SlabHeader>(buf)?;
        let raw_flags = u64::from_le_bytes(header.account_flags);
        let side = if raw_flags & AccountFlag::Bids as u64 != 0 {
            parse_flags(header.account_flags, AccountFlag::Bids, "bids")?;
            Side::Bid
        } else {
            parse_flags(header.account_flags, AccountFlag::Asks, "asks")?;
            Side::Ask
        };
        let view = SlabView {
            header,
            nodes: &buf[SlabHeader::LEN..buf.len() - ACCOUNT_TAIL_PADDING.len()],
        };
        let orders = view.walk(side)?;
        Ok(Self { side, orders })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Orders in tree order (key ascending)
    pub fn orders(&self) -> &[SlabOrder] {
        &self.orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders in display order: bids by descending price, asks by ascending price, older orders first at equal price.
    pub fn sorted(&self) -> Vec<SlabOrder> {
        let mut orders = self.orders.clone();
        match self.side {
            Side::Bid => orders.sort_by(|a, b| {
                b.price
                    .cmp(&a.price)
                    .then(a.sequence_number.cmp(&b.sequence_number))
            }),
            Side::Ask => orders.sort_by(|a, b| {
                a.price
                    .cmp(&b.price)
                    .then(a.sequence_number.cmp(&b.sequence_number))
            }),
        }
        orders
    }

    /// Best price on this side, if any order rests on it
    pub fn best(&self) -> Option<SlabOrder> {
        self.sorted().into_iter().next()
    }

    pub fn find(&self, order_id: u128) -> Option<&SlabOrder> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    /// Aggregate quantities by price, in display order, returning at most `depth` (price, quantity) levels.
    pub fn levels(&self, depth: usize) -> Vec<(u64, u64)> {
        let mut result: Vec<(u64, u64)> = Vec::with_capacity(depth);
        for order in self.sorted() {
            match result.last_mut() {
                Some((price, quantity)) if *price == order.price => *quantity += order.quantity,
                _ => {
                    if result.len() == depth {
                        break;
                    }
                    result.push((order.price, order.quantity));
                }
            }
        }
        result
    }
}

enum BuilderNode {
    Inner {
        prefix_len: u32,
        key: u128,
        children: [NodeHandle; 2],
    },
    Leaf(SlabOrder),
}

/// Writes a bids or asks account in the program's format.
///
/// Useful to feed local simulations and tests with realistic account data.
pub struct SlabBuilder {
    side: Side,
    nodes: Vec<BuilderNode>,
    root: Option<NodeHandle>,
    leaf_count: u32,
}

impl SlabBuilder {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            nodes: vec![],
            root: None,
            leaf_count: 0,
        }
    }

    /// Insert an order. An order with the same id clobbers the existing leaf.
    pub fn insert(&mut self, order: SlabOrder) -> &mut Self {
        let new_key = order.order_id;
        let mut node_h = match self.root {
            None => {
                self.nodes.push(BuilderNode::Leaf(order));
                self.root = Some(0);
                self.leaf_count = 1;
                return self;
            }
            Some(r) => r,
        };
        let mut parent: Option<(NodeHandle, bool)> = None;
        loop {
            let shared_prefix_len = match &mut self.nodes[node_h as usize] {
                BuilderNode::Inner {
                    prefix_len,
                    key,
                    children,
                } => {
                    let shared_prefix_len = (*key ^ new_key).leading_zeros();
                    if shared_prefix_len >= *prefix_len {
                        let crit_bit = new_key & ((1u128 << 127) >> *prefix_len) != 0;
                        parent = Some((node_h, crit_bit));
                        node_h = children[crit_bit as usize];
                        continue;
                    }
                    shared_prefix_len
                }
                BuilderNode::Leaf(leaf) => {
                    if leaf.order_id == new_key {
                        *leaf = order;
                        return self;
                    }
                    (leaf.order_id ^ new_key).leading_zeros()
                }
            };

            // insert a new inner node above `node_h` representing the LCA of the new leaf and `node_h`
            let crit_bit_mask: u128 = (1u128 << 127) >> shared_prefix_len;
            let new_leaf_crit_bit = (crit_bit_mask & new_key) != 0;
            let new_leaf_h = self.nodes.len() as NodeHandle;
            self.nodes.push(BuilderNode::Leaf(order));
            let mut children = [0; 2];
            children[new_leaf_crit_bit as usize] = new_leaf_h;
            children[!new_leaf_crit_bit as usize] = node_h;
            let new_inner_h = self.nodes.len() as NodeHandle;
            self.nodes.push(BuilderNode::Inner {
                prefix_len: shared_prefix_len,
                key: new_key,
                children,
            });
            match parent {
                Some((p, crit_bit)) => {
                    if let BuilderNode::Inner { children, .. } = &mut self.nodes[p as usize] {
                        children[crit_bit as usize] = new_inner_h;
                    }
                }
                None => self.root = Some(new_inner_h),
            }
            self.leaf_count += 1;
            return self;
        }
    }

    /// Serialize the tree, padding the node array with uninitialized nodes up to `capacity`.
    pub fn build(&self, capacity: usize) -> Vec<u8> {
        let capacity = std::cmp::max(capacity, self.nodes.len());
        let mut header = SlabHeader::zeroed();
        header.head_padding = *ACCOUNT_HEAD_PADDING;
        let flags = AccountFlag::Initialized
            | match self.side {
                Side::Bid => AccountFlag::Bids,
                Side::Ask => AccountFlag::Asks,
            };
        header.account_flags = flags.bits().to_le_bytes();
        header.bump_index = (self.nodes.len() as u32).to_le_bytes();
        header.root_node = self.root.unwrap_or(0).to_le_bytes();
        header.leaf_count = self.leaf_count.to_le_bytes();

        let mut buf = Vec::with_capacity(SlabHeader::LEN + capacity * NODE_LEN + 7);
        buf.extend_from_slice(bytemuck::bytes_of(&header));
        for node in &self.nodes {
            match node {
                BuilderNode::Inner {
                    prefix_len,
                    key,
                    children,
                } => {
                    let mut n = InnerNode::zeroed();
                    n.tag = u32::from(NodeTag::Inner).to_le_bytes();
                    n.prefix_len = prefix_len.to_le_bytes();
                    n.key = key.to_le_bytes();
                    n.children = [children[0].to_le_bytes(), children[1].to_le_bytes()];
                    buf.extend_from_slice(bytemuck::bytes_of(&n));
                }
                BuilderNode::Leaf(order) => {
                    let mut n = LeafNode::zeroed();
                    n.tag = u32::from(NodeTag::Leaf).to_le_bytes();
                    n.owner_slot = order.owner_slot;
                    n.fee_tier = order.fee_tier;
                    n.key = order.order_id.to_le_bytes();
                    n.owner = order.owner.to_bytes();
                    n.quantity = order.quantity.to_le_bytes();
                    n.client_order_id = order.client_order_id.to_le_bytes();
                    buf.extend_from_slice(bytemuck::bytes_of(&n));
                }
            }
        }
        buf.resize(SlabHeader::LEN + capacity * NODE_LEN, 0);
        buf.extend_from_slice(ACCOUNT_TAIL_PADDING);
        buf
    }
}

/// Build the order id the matching engine assigns to an order
pub fn order_id(side: Side, price: u64, sequence_number: u64) -> u128 {
    let lower = match side {
        Side::Bid => !sequence_number,
        Side::Ask => sequence_number,
    };
    ((price as u128) << 64) | lower as u128
}

/////////////////////////////////////
// Tests
